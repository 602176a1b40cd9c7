use http::{HeaderMap, Method, Uri};

/// The parts of an inbound request the gate looks at, detached from any
/// particular server framework.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Immediate peer as reported by the listener, usually `ip:port`.
    pub remote_addr: Option<String>,
    /// Whether the connection to us was TLS.
    pub tls: bool,
}

impl RequestMeta {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, remote_addr: Option<String>) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string, as the client sent it.
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Header value as a string; missing or non-UTF-8 values read as empty.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Look up a cookie across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"').to_string())
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}
