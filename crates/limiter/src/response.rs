use botgate_rate_limit::RateLimitStatus;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, RETRY_AFTER, SET_COOKIE, VARY};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::json;
use tracing::warn;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
/// Non-standard: `Suspicious` or `Normal`.
pub const RATELIMIT_STATUS: HeaderName = HeaderName::from_static("ratelimit-status");

/// A complete response produced by the gate itself, without the upstream.
#[derive(Debug, Clone)]
pub struct GateResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GateResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON block page: `{"reason": ...}`.
    pub fn block(status: StatusCode, reason: &str) -> Self {
        let mut body = json!({ "reason": reason }).to_string();
        body.push('\n');

        let mut resp = Self::empty(status);
        resp.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        resp.body = Bytes::from(body);
        resp.no_store()
    }

    pub fn html(status: StatusCode, page: String) -> Self {
        let mut resp = Self::empty(status);
        resp.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        resp.body = Bytes::from(page);
        resp
    }

    /// Redirect to a local path. Locations that cannot be carried in a
    /// header fall back to `/`.
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        let value = HeaderValue::from_str(location).unwrap_or_else(|e| {
            warn!(location, error = %e, "unusable redirect location");
            HeaderValue::from_static("/")
        });
        let mut resp = Self::empty(status);
        resp.headers.insert(LOCATION, value);
        resp
    }

    pub fn no_store(mut self) -> Self {
        self.headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        self
    }

    pub fn with_vary(mut self) -> Self {
        append_vary(&mut self.headers);
        self
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                self.headers.append(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "access cookie is not a valid header value"),
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Ask caches to key challenge-sensitive responses on the cookie and
/// content negotiation.
pub fn append_vary(headers: &mut HeaderMap) {
    headers.append(VARY, HeaderValue::from_static("Cookie"));
    headers.append(VARY, HeaderValue::from_static("Accept"));
}

/// `RateLimit-*` headers for a network, plus `Retry-After` once drained.
pub fn rate_limit_headers(status: &RateLimitStatus, client_suspicious: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(status.reset_secs));
    if let Some(retry_after) = status.retry_after() {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
    let label = if client_suspicious { "Suspicious" } else { "Normal" };
    headers.insert(RATELIMIT_STATUS, HeaderValue::from_static(label));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_body_is_json_reason() {
        let resp = GateResponse::block(StatusCode::FORBIDDEN, "IP in block-list");
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert_eq!(resp.header(CACHE_CONTROL), Some("no-store"));
        assert_eq!(resp.header(CONTENT_TYPE), Some("application/json; charset=utf-8"));
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["reason"], "IP in block-list");
    }

    #[test]
    fn headers_for_partial_bucket() {
        let status = RateLimitStatus {
            limit: 120,
            remaining: 119,
            reset_secs: 1,
        };
        let headers = rate_limit_headers(&status, false);
        assert_eq!(headers[&RATELIMIT_LIMIT], "120");
        assert_eq!(headers[&RATELIMIT_REMAINING], "119");
        assert_eq!(headers[&RATELIMIT_RESET], "1");
        assert_eq!(headers[&RATELIMIT_STATUS], "Normal");
        assert!(!headers.contains_key(RETRY_AFTER));
    }

    #[test]
    fn retry_after_when_drained() {
        let status = RateLimitStatus {
            limit: 90,
            remaining: 0,
            reset_secs: 900,
        };
        let headers = rate_limit_headers(&status, true);
        assert_eq!(headers[&RETRY_AFTER], "900");
        assert_eq!(headers[&RATELIMIT_STATUS], "Suspicious");
    }

    #[test]
    fn vary_is_appended_not_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        append_vary(&mut headers);
        let values: Vec<_> = headers.get_all(VARY).iter().collect();
        assert_eq!(values, ["Origin", "Cookie", "Accept"]);
    }

    #[test]
    fn bad_location_falls_back_to_root() {
        let resp = GateResponse::redirect(StatusCode::FOUND, "/a\nb");
        assert_eq!(resp.header(LOCATION), Some("/"));
    }
}
