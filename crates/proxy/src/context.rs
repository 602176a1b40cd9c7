use http::HeaderMap;
use std::time::Instant;

/// Per-request context carried through the Pingora proxy pipeline.
pub struct RequestContext {
    /// Resolved client IP, for logs and the upstream `X-Real-IP`.
    pub client_ip: String,

    /// Request start time for latency measurement.
    pub request_start: Instant,

    /// What the gate did with the request.
    pub outcome: Outcome,

    /// HTTP method (cached for logging).
    pub method: String,

    /// Request URI (cached for logging).
    pub uri: String,

    /// Response status code, from the gate or the upstream.
    pub response_status: u16,

    /// Rate-limit and `Vary` headers to add to the upstream response.
    pub gate_headers: HeaderMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Blocked,
    RateLimited,
    Challenged,
    /// Answered by one of the `/limiter/` endpoints.
    Endpoint,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Blocked => "blocked",
            Outcome::RateLimited => "rate_limited",
            Outcome::Challenged => "challenged",
            Outcome::Endpoint => "endpoint",
        }
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            client_ip: String::new(),
            request_start: Instant::now(),
            outcome: Outcome::Forwarded,
            method: String::new(),
            uri: String::new(),
            response_status: 0,
            gate_headers: HeaderMap::new(),
        }
    }
}
