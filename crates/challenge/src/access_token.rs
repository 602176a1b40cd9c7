//! The signed access ("ping") cookie.
//!
//! Clients that pass a challenge receive an ES256 JWT carrying their
//! fingerprint. The P-256 key pair is derived from the configured secret, so
//! every instance sharing the secret accepts the same cookies and a restart
//! does not log anyone out.

use std::sync::Arc;

use botgate_common::{Clock, SameSite};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Cookie lifetime: seven days.
pub const ACCESS_TOKEN_MAX_AGE_SECS: i64 = 604_800;

pub const ACCESS_TOKEN_SUBJECT: &str = "allowed access";

#[derive(Debug, Error)]
pub enum AccessTokenError {
    #[error("failed to derive signing key: {0}")]
    Key(String),
    #[error("failed to sign access token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid access token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("access token expired")]
    Expired,
    #[error("access token has unexpected subject")]
    Subject,
    #[error("access token belongs to another client")]
    FingerprintMismatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: i64,
    #[serde(rename = "clientFingerprint")]
    client_fingerprint: String,
}

pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl AccessTokenSigner {
    /// Derive the key pair from `secret` (SHA-256 of the secret as the scalar).
    pub fn from_secret(secret: &str, clock: Arc<dyn Clock>) -> Result<Self, AccessTokenError> {
        let seed = Sha256::digest(secret.as_bytes());
        let secret_key = p256::SecretKey::from_slice(&seed)
            .map_err(|e| AccessTokenError::Key(format!("{e}")))?;

        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AccessTokenError::Key(format!("{e:?}")))?;
        let public_pem = secret_key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AccessTokenError::Key(format!("{e:?}")))?;

        let encoding = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AccessTokenError::Key(e.to_string()))?;
        let decoding = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| AccessTokenError::Key(e.to_string()))?;

        Ok(Self {
            encoding,
            decoding,
            clock,
        })
    }

    pub fn issue(&self, fingerprint: &str) -> Result<String, AccessTokenError> {
        let claims = AccessClaims {
            sub: ACCESS_TOKEN_SUBJECT.to_string(),
            exp: self.clock.now().timestamp() + ACCESS_TOKEN_MAX_AGE_SECS,
            client_fingerprint: fingerprint.to_string(),
        };
        encode(&Header::new(Algorithm::ES256), &claims, &self.encoding)
            .map_err(AccessTokenError::Sign)
    }

    /// Check signature, subject, expiry and fingerprint.
    pub fn verify(&self, token: &str, fingerprint: &str) -> Result<(), AccessTokenError> {
        let mut validation = Validation::new(Algorithm::ES256);
        // Expiry is checked against our own clock below.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(AccessTokenError::Invalid)?;
        let claims = data.claims;

        if claims.sub != ACCESS_TOKEN_SUBJECT {
            return Err(AccessTokenError::Subject);
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(AccessTokenError::Expired);
        }
        if claims.client_fingerprint != fingerprint {
            return Err(AccessTokenError::FingerprintMismatch);
        }
        Ok(())
    }
}

/// `Set-Cookie` value for the access cookie.
pub fn access_cookie(name: &str, value: &str, same_site: SameSite, secure: bool) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; Max-Age={ACCESS_TOKEN_MAX_AGE_SECS}; HttpOnly; SameSite={}",
        same_site.as_str()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgate_common::MockClock;
    use chrono::{Duration, Utc};

    fn signer(secret: &str) -> (Arc<MockClock>, AccessTokenSigner) {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let signer = AccessTokenSigner::from_secret(secret, clock.clone()).unwrap();
        (clock, signer)
    }

    #[test]
    fn issue_then_verify() {
        let (_clock, signer) = signer("s3cret");
        let token = signer.issue("42").unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert!(signer.verify(&token, "42").is_ok());
    }

    #[test]
    fn fingerprint_must_match() {
        let (_clock, signer) = signer("s3cret");
        let token = signer.issue("42").unwrap();
        assert!(matches!(
            signer.verify(&token, "43"),
            Err(AccessTokenError::FingerprintMismatch)
        ));
    }

    #[test]
    fn expires_after_seven_days() {
        let (clock, signer) = signer("s3cret");
        let token = signer.issue("42").unwrap();

        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert!(signer.verify(&token, "42").is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(signer.verify(&token, "42"), Err(AccessTokenError::Expired)));
    }

    #[test]
    fn other_secret_rejects() {
        let (_clock, signer_a) = signer("secret-a");
        let (_clock, signer_b) = signer("secret-b");
        let token = signer_a.issue("42").unwrap();
        assert!(matches!(
            signer_b.verify(&token, "42"),
            Err(AccessTokenError::Invalid(_))
        ));
    }

    #[test]
    fn same_secret_same_keys() {
        let (_clock, signer_a) = signer("shared");
        let (_clock, signer_b) = signer("shared");
        let token = signer_a.issue("42").unwrap();
        assert!(signer_b.verify(&token, "42").is_ok());
    }

    #[test]
    fn tampered_token_rejected() {
        let (_clock, signer) = signer("s3cret");
        let token = signer.issue("42").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = "eyJzdWIiOiJhbGxvd2VkIGFjY2VzcyIsImV4cCI6OTk5OTk5OTk5OSwiY2xpZW50RmluZ2VycHJpbnQiOiI0MiJ9";
        let forged = parts.join(".");
        assert!(signer.verify(&forged, "42").is_err());
        assert!(signer.verify("garbage", "42").is_err());
    }

    #[test]
    fn cookie_attributes() {
        assert_eq!(
            access_cookie("botgate_ping", "abc", SameSite::Lax, true),
            "botgate_ping=abc; Path=/; Max-Age=604800; HttpOnly; SameSite=Lax; Secure"
        );
        assert!(!access_cookie("botgate_ping", "abc", SameSite::Strict, false).contains("Secure"));
    }
}
