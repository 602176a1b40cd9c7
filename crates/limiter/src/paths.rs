/// Path classification for the gate.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    excluded_prefixes: Vec<String>,
    feed_markers: Vec<String>,
}

impl PathPolicy {
    pub fn new(excluded_prefixes: Vec<String>, feed_markers: Vec<String>) -> Self {
        Self {
            excluded_prefixes,
            feed_markers,
        }
    }

    /// Paths that bypass the gate entirely.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    /// Feed requests get their own quota and skip header heuristics.
    pub fn is_feed(&self, path: &str) -> bool {
        self.feed_markers
            .iter()
            .any(|marker| !marker.is_empty() && path.contains(marker.as_str()))
    }
}

/// Keep a client-supplied return path only when it stays on this origin.
/// Rejected input yields `/` itself, so callers need no default of their own.
pub fn sanitize_return_path(raw: &str) -> String {
    let candidate = raw.trim();
    if candidate.contains("://") || candidate.starts_with("//") || !candidate.starts_with('/') {
        return "/".to_string();
    }
    candidate.to_string()
}
