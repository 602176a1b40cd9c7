//! Challenge/response pieces: single-use link tokens, the signed access
//! cookie, third-party verification and the challenge page.

pub mod access_token;
pub mod link_token;
pub mod page;
pub mod verifier;

pub use access_token::{access_cookie, AccessTokenError, AccessTokenSigner, ACCESS_TOKEN_MAX_AGE_SECS};
pub use link_token::{LinkTokenError, LinkTokenStore, LINK_TOKEN_TTL_SECS};
pub use page::{escape_html, render_challenge_page, ChallengeKind};
pub use verifier::{ChallengeVerifier, SiteverifyResponse, TurnstileVerifier, VerifyError};
