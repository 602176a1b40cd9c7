use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use botgate_common::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

/// How long an issued link token stays redeemable.
pub const LINK_TOKEN_TTL_SECS: i64 = 60;

const TOKEN_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkTokenError {
    #[error("unknown link token")]
    Unknown,
    #[error("link token expired")]
    Expired,
    #[error("link token presented by a different client")]
    FingerprintMismatch,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    fingerprint: String,
    expires_at: DateTime<Utc>,
}

/// Single-use, short-lived tokens bound to a client fingerprint.
pub struct LinkTokenStore {
    tokens: Mutex<HashMap<String, TokenEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LinkTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::seconds(LINK_TOKEN_TTL_SECS))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Mint a token for `fingerprint`: 24 random bytes, URL-safe base64.
    pub fn issue(&self, fingerprint: &str) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE.encode(bytes);

        let entry = TokenEntry {
            fingerprint: fingerprint.to_string(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.tokens.lock().insert(token.clone(), entry);
        token
    }

    /// Consume `token` if it is live and belongs to `fingerprint`.
    ///
    /// Unknown and expired tokens are dropped. A token presented with the
    /// wrong fingerprint is left in place for its owner.
    pub fn redeem(&self, token: &str, fingerprint: &str) -> Result<(), LinkTokenError> {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock();

        let Some(entry) = tokens.get(token) else {
            return Err(LinkTokenError::Unknown);
        };

        if now > entry.expires_at {
            tokens.remove(token);
            return Err(LinkTokenError::Expired);
        }

        if entry.fingerprint != fingerprint {
            warn!(
                link_token = token,
                expected = %entry.fingerprint,
                received = fingerprint,
                "fingerprint mismatch for link token"
            );
            return Err(LinkTokenError::FingerprintMismatch);
        }

        tokens.remove(token);
        Ok(())
    }

    /// Drop every expired token. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, entry| now <= entry.expires_at);
        let removed = before - tokens.len();

        if removed > 0 {
            info!(count = removed, remaining = tokens.len(), "cleaned up expired link tokens");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgate_common::MockClock;

    fn store() -> (Arc<MockClock>, LinkTokenStore) {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = LinkTokenStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn token_shape() {
        let (_clock, store) = store();
        let token = store.issue("123");
        assert_eq!(token.len(), 32);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, store.issue("123"));
    }

    #[test]
    fn single_use() {
        let (_clock, store) = store();
        let token = store.issue("fp");
        assert_eq!(store.redeem(&token, "fp"), Ok(()));
        assert_eq!(store.redeem(&token, "fp"), Err(LinkTokenError::Unknown));
    }

    #[test]
    fn mismatch_does_not_consume() {
        let (_clock, store) = store();
        let token = store.issue("owner");
        assert_eq!(
            store.redeem(&token, "someone-else"),
            Err(LinkTokenError::FingerprintMismatch)
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.redeem(&token, "owner"), Ok(()));
    }

    #[test]
    fn expiry_boundary() {
        let (clock, store) = store();
        let early = store.issue("fp");
        let exact = store.issue("fp");
        let late = store.issue("fp");

        clock.advance(Duration::seconds(59));
        assert_eq!(store.redeem(&early, "fp"), Ok(()));

        clock.advance(Duration::seconds(1));
        assert_eq!(store.redeem(&exact, "fp"), Ok(()), "still valid at exactly 60s");

        clock.advance(Duration::seconds(1));
        assert_eq!(store.redeem(&late, "fp"), Err(LinkTokenError::Expired));
        assert!(store.is_empty(), "expired token is removed");
    }

    #[test]
    fn purge_drops_only_expired() {
        let (clock, store) = store();
        store.issue("a");
        clock.advance(Duration::seconds(30));
        let fresh = store.issue("b");

        clock.advance(Duration::seconds(31));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.redeem(&fresh, "b"), Ok(()));
    }
}
