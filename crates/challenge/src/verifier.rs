use std::time::Duration;

use async_trait::async_trait;
use botgate_common::TurnstileConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure to get a verdict from the verification service.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to marshal verification request: {0}")]
    Marshal(#[source] serde_json::Error),
    #[error("failed to send verification request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to read verification response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    #[error("failed to parse verification response: {0}")]
    Parse(#[source] serde_json::Error),
}

impl VerifyError {
    /// The service could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, VerifyError::Transport(_))
    }
}

#[derive(Debug, Serialize)]
struct SiteverifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    remoteip: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct SiteverifyResponse {
    pub success: bool,
    #[serde(default)]
    pub challenge_ts: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub cdata: String,
}

/// Server-side check of a widget response token.
#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// `Ok(true)` when the service vouches for the token.
    async fn verify(&self, response: &str, remote_ip: &str) -> Result<bool, VerifyError>;
}

/// Cloudflare Turnstile `siteverify` client.
pub struct TurnstileVerifier {
    client: reqwest::Client,
    endpoint: String,
    secret_key: String,
}

impl TurnstileVerifier {
    pub fn new(config: &TurnstileConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.verify_url.clone(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl ChallengeVerifier for TurnstileVerifier {
    async fn verify(&self, response: &str, remote_ip: &str) -> Result<bool, VerifyError> {
        let body = serde_json::to_vec(&SiteverifyRequest {
            secret: &self.secret_key,
            response,
            remoteip: remote_ip,
        })
        .map_err(VerifyError::Marshal)?;

        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(VerifyError::Transport)?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(VerifyError::ReadBody)?;
        debug!(status = status.as_u16(), len = bytes.len(), "siteverify responded");

        let result: SiteverifyResponse =
            serde_json::from_slice(&bytes).map_err(VerifyError::Parse)?;

        if !result.success {
            warn!(
                hostname = %result.hostname,
                action = %result.action,
                cdata = %result.cdata,
                error_codes = ?result.error_codes,
                "turnstile verification failed per siteverify"
            );
        }
        Ok(result.success)
    }
}
