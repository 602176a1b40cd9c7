//! The gate's own endpoints under `/limiter/`.

use botgate_bot_detect::ClientIdentity;
use botgate_challenge::{render_challenge_page, ChallengeKind};
use botgate_common::{DetectionMethod, RequestMeta};
use http::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use crate::paths::sanitize_return_path;
use crate::pipeline::{Gate, CHALLENGE_PATH};
use crate::response::GateResponse;

pub const ENDPOINT_PREFIX: &str = "/limiter/";
pub const TURNSTILE_VERIFY_PATH: &str = "/limiter/turnstile/verify";

const RETURN_PATH_FIELD: &str = "return_path";
const TURNSTILE_RESPONSE_FIELD: &str = "cf-turnstile-response";

fn form_value(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn is_read(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

impl Gate {
    /// Serve `req` if it targets one of the gate's endpoints. `body` is the
    /// request body, consulted only by form posts.
    pub async fn serve_endpoint(&self, req: &RequestMeta, body: &[u8]) -> Option<GateResponse> {
        let path = req.path();
        let rest = path.strip_prefix(ENDPOINT_PREFIX)?;

        let resp = if path == CHALLENGE_PATH {
            if is_read(&req.method) {
                self.challenge_page(req)
            } else {
                GateResponse::empty(StatusCode::METHOD_NOT_ALLOWED)
            }
        } else if path == TURNSTILE_VERIFY_PATH {
            if req.method == Method::POST {
                self.verify_turnstile(req, body).await
            } else {
                GateResponse::empty(StatusCode::METHOD_NOT_ALLOWED)
            }
        } else if !rest.is_empty() && !rest.contains('/') && is_read(&req.method) {
            self.redeem_link_token(req, rest)
        } else {
            GateResponse::empty(StatusCode::NOT_FOUND)
        };
        Some(resp)
    }

    fn turnstile_page(&self, status: StatusCode, return_path: &str, message: Option<&str>) -> GateResponse {
        let kind = ChallengeKind::Turnstile {
            site_key: self.config.turnstile.site_key.clone(),
        };
        GateResponse::html(status, render_challenge_page(&kind, return_path, message))
            .no_store()
            .with_vary()
    }

    /// `GET /limiter/challenge?return_path=...`
    pub fn challenge_page(&self, req: &RequestMeta) -> GateResponse {
        let client = match self.identify(req) {
            Ok(client) => client,
            Err(resp) => return resp,
        };
        let return_path =
            sanitize_return_path(&req.query_param(RETURN_PATH_FIELD).unwrap_or_default());

        if self.check_cookie(req, &client) {
            debug!(ip = %client.ip(), return_path = %return_path, "access cookie already valid, skipping challenge");
            return GateResponse::redirect(StatusCode::FOUND, &return_path)
                .no_store()
                .with_vary();
        }

        match self.config.detection_method {
            DetectionMethod::LinkToken => {
                let token = self.link_tokens.issue(client.fingerprint());
                info!(
                    ip = %client.ip(),
                    network = %client.network(),
                    return_path = %return_path,
                    "serving link token challenge"
                );
                let page = render_challenge_page(&ChallengeKind::LinkToken { token }, &return_path, None);
                GateResponse::html(StatusCode::OK, page).no_store().with_vary()
            }
            DetectionMethod::Turnstile => {
                info!(
                    ip = %client.ip(),
                    network = %client.network(),
                    return_path = %return_path,
                    "serving turnstile challenge"
                );
                self.turnstile_page(StatusCode::OK, &return_path, None)
            }
            DetectionMethod::None => {
                warn!(ip = %client.ip(), "challenge requested but no detection method is configured");
                GateResponse::block(StatusCode::INTERNAL_SERVER_ERROR, "Unsupported detection method")
                    .with_vary()
            }
        }
    }

    /// `GET /limiter/{token}`, fetched by the challenge page as a stylesheet.
    pub fn redeem_link_token(&self, req: &RequestMeta, token: &str) -> GateResponse {
        let client = match self.identify(req) {
            Ok(client) => client,
            Err(resp) => return resp,
        };

        if self.check_cookie(req, &client) {
            return GateResponse::empty(StatusCode::NO_CONTENT);
        }

        if let Err(e) = self.link_tokens.redeem(token, client.fingerprint()) {
            warn!(
                ip = %client.ip(),
                network = %client.network(),
                link_token = token,
                error = %e,
                "invalid or expired link token"
            );
            return GateResponse::empty(StatusCode::NOT_FOUND);
        }

        match self.issue_cookie(req, &client) {
            Ok(cookie) => {
                info!(ip = %client.ip(), network = %client.network(), "link token redeemed, access cookie set");
                GateResponse::empty(StatusCode::NO_CONTENT)
                    .with_cookie(&cookie)
                    .no_store()
            }
            Err(resp) => resp,
        }
    }

    /// `POST /limiter/turnstile/verify` with the widget's form fields.
    pub async fn verify_turnstile(&self, req: &RequestMeta, body: &[u8]) -> GateResponse {
        let return_path = sanitize_return_path(
            &form_value(body, RETURN_PATH_FIELD)
                .or_else(|| req.query_param(RETURN_PATH_FIELD))
                .unwrap_or_default(),
        );

        let client: ClientIdentity = match self.identify(req) {
            Ok(client) => client,
            Err(_) => {
                return self.turnstile_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &return_path,
                    Some("Could not identify your connection. Please try again."),
                )
            }
        };

        let Some(response) = form_value(body, TURNSTILE_RESPONSE_FIELD) else {
            warn!(ip = %client.ip(), "turnstile verify without a response token");
            return self.turnstile_page(
                StatusCode::BAD_REQUEST,
                &return_path,
                Some("Missing verification token. Please complete the challenge."),
            );
        };

        let Some(verifier) = self.verifier.as_ref() else {
            error!("turnstile verify requested but no verifier is configured");
            return GateResponse::block(StatusCode::INTERNAL_SERVER_ERROR, "Unsupported detection method")
                .with_vary();
        };

        match verifier.verify(&response, &client.ip().to_string()).await {
            Err(e) if e.is_unavailable() => {
                error!(ip = %client.ip(), error = %e, "turnstile verification service unreachable");
                self.turnstile_page(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &return_path,
                    Some("Could not reach the verification service. Please try again later."),
                )
            }
            Err(e) => {
                error!(ip = %client.ip(), error = %e, "turnstile verification error");
                self.turnstile_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &return_path,
                    Some("Verification error. Please try again."),
                )
            }
            Ok(false) => {
                warn!(ip = %client.ip(), network = %client.network(), "turnstile verification failed");
                self.turnstile_page(StatusCode::BAD_REQUEST, &return_path, Some("Verification failed"))
            }
            Ok(true) => match self.issue_cookie(req, &client) {
                Ok(cookie) => {
                    info!(
                        ip = %client.ip(),
                        network = %client.network(),
                        return_path = %return_path,
                        "turnstile verified, access cookie set"
                    );
                    GateResponse::redirect(StatusCode::SEE_OTHER, &return_path)
                        .with_cookie(&cookie)
                        .no_store()
                        .with_vary()
                }
                Err(resp) => resp,
            },
        }
    }
}
