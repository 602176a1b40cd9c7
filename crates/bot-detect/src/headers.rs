use http::HeaderMap;

use crate::known_bots::is_known_bot;

const ACCEPTED_ENCODINGS: &[&str] = &["identity", "gzip", "deflate"];

const SEC_FETCH_HEADERS: &[&str] = &["Sec-Fetch-Dest", "Sec-Fetch-Mode", "Sec-Fetch-Site"];

/// Accept types a resource extension requires; any one of them will do.
struct AcceptRule {
    accepted: &'static [&'static str],
    message: &'static str,
}

const HTML_RULE: AcceptRule = AcceptRule {
    accepted: &["text/html"],
    message: "HTML file requires text/html Accept type",
};

const IMAGE_RULE: AcceptRule = AcceptRule {
    accepted: &["image/"],
    message: "Image file requires image/* Accept type",
};

const TEXT_RULE: AcceptRule = AcceptRule {
    accepted: &["text/plain"],
    message: "Text file requires text/plain Accept type",
};

const WOFF2_TYPES: &[&str] = &["application/font-woff2", "application/font-woff", "font/woff"];

fn accept_rule(extension: &str) -> AcceptRule {
    match extension {
        ".js" => AcceptRule {
            accepted: &["application/javascript", "text/javascript"],
            message: "JavaScript file requires JavaScript Accept type",
        },
        ".css" => AcceptRule {
            accepted: &["text/css"],
            message: "CSS file requires text/css Accept type",
        },
        ".png" | ".jpeg" | ".jpg" | ".gif" | ".svg" => IMAGE_RULE,
        ".json" => AcceptRule {
            accepted: &["application/json"],
            message: "JSON file requires application/json Accept type",
        },
        ".txt" | ".map" | ".scss" => TEXT_RULE,
        ".woff2" => AcceptRule {
            accepted: WOFF2_TYPES,
            message: "WOFF2 font file requires Accept type: ",
        },
        _ => HTML_RULE,
    }
}

/// Extension of the last path segment, dot included, lowercased.
fn extension(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or(path);
    segment
        .rfind('.')
        .map(|idx| segment[idx..].to_ascii_lowercase())
        .unwrap_or_default()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Check the `Accept` header against what the path's extension needs.
pub fn check_accept(path: &str, accept: &str) -> Option<String> {
    if accept.contains("*/*") {
        return None;
    }

    let ext = extension(path);
    let rule = accept_rule(&ext);
    if rule.accepted.iter().any(|t| accept.contains(t)) {
        return None;
    }

    if ext == ".woff2" {
        return Some(format!("{}{}", rule.message, WOFF2_TYPES.join(" or ")));
    }
    Some(rule.message.to_string())
}

fn check_sec_fetch(headers: &HeaderMap) -> Option<String> {
    let missing: Vec<&str> = SEC_FETCH_HEADERS
        .iter()
        .copied()
        .filter(|name| header(headers, name).is_empty())
        .collect();

    match missing.as_slice() {
        [] => None,
        [one] => Some(format!("Missing {one} header")),
        many => {
            let mut names = many.to_vec();
            names.sort_unstable();
            Some(format!("Missing Sec-Fetch headers: {}", names.join(", ")))
        }
    }
}

/// Run the header heuristics in order and return the first failure.
///
/// `secure` enables the `Sec-Fetch-*` checks, which browsers only send over
/// secure connections.
pub fn classify_headers(path: &str, headers: &HeaderMap, secure: bool) -> Option<String> {
    let user_agent = header(headers, "user-agent");
    if user_agent.is_empty() {
        return Some("Blocked by User-Agent header, missing or empty".to_string());
    }
    if is_known_bot(user_agent) {
        return Some("Blocked by User-Agent header, known bot".to_string());
    }

    if let Some(reason) = check_accept(path, header(headers, "accept")) {
        return Some(format!("Blocked by Accept header, {reason}"));
    }

    let encoding = header(headers, "accept-encoding").to_ascii_lowercase();
    if !ACCEPTED_ENCODINGS.iter().any(|e| encoding.contains(e)) {
        return Some("Blocked by Accept-Encoding header".to_string());
    }

    if header(headers, "accept-language").trim().is_empty() {
        return Some("Blocked by Accept-Language header".to_string());
    }

    if secure {
        return check_sec_fetch(headers);
    }

    None
}
