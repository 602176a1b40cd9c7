//! Client identification and stateless bot heuristics.
//!
//! [`identity`] works out which address and network a request belongs to and
//! derives a coarse fingerprint from it. [`headers`] rejects requests whose
//! headers do not look like they came from a browser.

pub mod headers;
pub mod identity;
pub mod known_bots;

pub use headers::classify_headers;
pub use identity::{is_secure, ClientIdentity, IdentityError, NetworkPrefixes};
pub use known_bots::is_known_bot;
