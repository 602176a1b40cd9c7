//! Request admission for the proxy.
//!
//! [`Gate::evaluate`] decides per request whether to forward, block or send
//! the client through a challenge; [`Gate::serve_endpoint`] answers the
//! challenge endpoints under `/limiter/`.

pub mod handlers;
pub mod maintenance;
pub mod paths;
pub mod pipeline;
pub mod response;

pub use handlers::{ENDPOINT_PREFIX, TURNSTILE_VERIFY_PATH};
pub use paths::{sanitize_return_path, PathPolicy};
pub use pipeline::{Gate, Verdict, CHALLENGE_PATH};
pub use response::{append_vary, rate_limit_headers, GateResponse};
