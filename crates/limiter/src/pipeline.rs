use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use botgate_bot_detect::{classify_headers, is_secure, ClientIdentity, NetworkPrefixes};
use botgate_challenge::{
    access_cookie, AccessTokenSigner, ChallengeVerifier, LinkTokenStore, TurnstileVerifier,
};
use botgate_common::{Clock, DetectionMethod, LimiterConfig, RequestMeta};
use botgate_ip_reputation::{IpAction, IpLists};
use botgate_rate_limit::NetworkRegistry;
use http::{HeaderMap, StatusCode};
use tracing::{debug, info, warn};

use crate::maintenance::{spawn_sweep, sweep, MaintenanceTimer};
use crate::paths::PathPolicy;
use crate::response::{append_vary, rate_limit_headers, GateResponse};

/// Where clients without a valid access cookie are sent.
pub const CHALLENGE_PATH: &str = "/limiter/challenge";

/// What to do with an inbound request.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Forward upstream, adding `headers` to the upstream response.
    Allow { headers: HeaderMap },
    /// Answer directly with an error.
    Block(GateResponse),
    /// Send the client to the challenge page.
    Challenge(GateResponse),
}

impl Verdict {
    fn pass() -> Self {
        Verdict::Allow {
            headers: HeaderMap::new(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    /// The direct response, if the request is not forwarded.
    pub fn response(&self) -> Option<&GateResponse> {
        match self {
            Verdict::Allow { .. } => None,
            Verdict::Block(resp) | Verdict::Challenge(resp) => Some(resp),
        }
    }
}

/// The admission pipeline: identity, lists, header heuristics, challenge
/// cookie and per-network rate limits.
pub struct Gate {
    pub(crate) config: LimiterConfig,
    pub(crate) prefixes: NetworkPrefixes,
    pub(crate) paths: PathPolicy,
    pub(crate) ip_lists: IpLists,
    pub(crate) registry: Arc<NetworkRegistry>,
    pub(crate) link_tokens: Arc<LinkTokenStore>,
    pub(crate) signer: Option<AccessTokenSigner>,
    pub(crate) verifier: Option<Arc<dyn ChallengeVerifier>>,
    maintenance: MaintenanceTimer,
    clock: Arc<dyn Clock>,
}

impl Gate {
    pub fn new(config: &LimiterConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(NetworkRegistry::new(Arc::clone(&clock)));
        let maintenance = MaintenanceTimer::new(registry.tuning().cleanup_interval);

        let signer = if config.detection_method.is_enabled() {
            let signer = AccessTokenSigner::from_secret(&config.secret, Arc::clone(&clock))
                .context("failed to derive access cookie key")?;
            Some(signer)
        } else {
            None
        };

        let verifier: Option<Arc<dyn ChallengeVerifier>> =
            if config.detection_method == DetectionMethod::Turnstile {
                let verifier = TurnstileVerifier::new(&config.turnstile)
                    .context("failed to build turnstile client")?;
                Some(Arc::new(verifier))
            } else {
                None
            };

        let ip_lists = IpLists::from_entries(&config.pass_list, &config.block_list);

        info!(
            enabled = config.enabled,
            detection_method = ?config.detection_method,
            check_headers = config.check_headers,
            filter_local = config.filter_local,
            pass_list = ip_lists.pass_len(),
            block_list = ip_lists.block_len(),
            "limiter initialized"
        );

        Ok(Self {
            prefixes: NetworkPrefixes {
                ipv4: config.ipv4_prefix,
                ipv6: config.ipv6_prefix,
            },
            paths: PathPolicy::new(config.excluded_paths.clone(), config.feed_markers.clone()),
            config: config.clone(),
            ip_lists,
            registry,
            link_tokens: Arc::new(LinkTokenStore::new(Arc::clone(&clock))),
            signer,
            verifier,
            maintenance,
            clock,
        })
    }

    /// Replace the third-party verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn ChallengeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn link_tokens(&self) -> &Arc<LinkTokenStore> {
        &self.link_tokens
    }

    pub fn ip_lists(&self) -> &IpLists {
        &self.ip_lists
    }

    /// Load the registry snapshot from the configured state file.
    pub fn restore_state(&self) {
        self.registry.restore_from_file(&self.config.state_file);
    }

    /// Write the registry snapshot to the configured state file.
    pub fn persist_state(&self) {
        self.registry.persist_to_file(&self.config.state_file);
    }

    pub fn state_file(&self) -> &Path {
        &self.config.state_file
    }

    /// Run the sweep now, on the calling thread.
    pub fn run_maintenance(&self) {
        sweep(&self.registry, &self.link_tokens);
    }

    fn maintenance_tick(&self) {
        if self.maintenance.is_due(self.clock.now()) {
            spawn_sweep(Arc::clone(&self.registry), Arc::clone(&self.link_tokens));
        }
    }

    pub(crate) fn identify(&self, req: &RequestMeta) -> Result<ClientIdentity, GateResponse> {
        ClientIdentity::from_request(req, self.prefixes).map_err(|e| {
            warn!(
                remote_addr = req.remote_addr.as_deref().unwrap_or(""),
                error = %e,
                "could not identify client"
            );
            GateResponse::block(StatusCode::BAD_REQUEST, &e.to_string())
        })
    }

    /// Whether the request carries a valid access cookie for `client`.
    pub(crate) fn has_valid_cookie(&self, req: &RequestMeta, client: &ClientIdentity) -> bool {
        let Some(signer) = self.signer.as_ref() else {
            return false;
        };
        let Some(token) = req.cookie(&self.config.cookie.name) else {
            return false;
        };
        match signer.verify(&token, client.fingerprint()) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    ip = %client.ip(),
                    network = %client.network(),
                    error = %e,
                    "invalid access cookie"
                );
                false
            }
        }
    }

    /// Cookie check for the challenge endpoints. The result goes into the
    /// network's history: a missing or invalid cookie counts as suspicious.
    pub(crate) fn check_cookie(&self, req: &RequestMeta, client: &ClientIdentity) -> bool {
        let valid = self.has_valid_cookie(req, client);
        self.registry.record_client(&client.network_key(), !valid);
        valid
    }

    /// Mint a fresh access cookie for `client`, as a `Set-Cookie` value.
    pub(crate) fn issue_cookie(
        &self,
        req: &RequestMeta,
        client: &ClientIdentity,
    ) -> Result<String, GateResponse> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            GateResponse::block(StatusCode::INTERNAL_SERVER_ERROR, "Access cookies are disabled")
        })?;
        let token = signer.issue(client.fingerprint()).map_err(|e| {
            warn!(ip = %client.ip(), error = %e, "failed to sign access cookie");
            GateResponse::block(StatusCode::INTERNAL_SERVER_ERROR, "Failed to issue access cookie")
        })?;
        let cookie = &self.config.cookie;
        let secure = cookie.secure || is_secure(req);
        Ok(access_cookie(&cookie.name, &token, cookie.same_site, secure))
    }

    /// Decide what happens to `req`.
    pub fn evaluate(&self, req: &RequestMeta) -> Verdict {
        if !self.config.enabled {
            return Verdict::pass();
        }

        self.maintenance_tick();

        let mut client = match self.identify(req) {
            Ok(client) => client,
            Err(resp) => return Verdict::Block(resp),
        };

        let path = req.path();
        if self.paths.is_excluded(path) {
            debug!(path, "path excluded from limiter");
            return Verdict::pass();
        }

        match self.ip_lists.check(client.ip()) {
            IpAction::Pass => {
                debug!(ip = %client.ip(), "IP in pass-list");
                return Verdict::pass();
            }
            IpAction::Block => {
                warn!(ip = %client.ip(), network = %client.network(), "request blocked, IP in block-list");
                return Verdict::Block(GateResponse::block(StatusCode::FORBIDDEN, "IP in block-list"));
            }
            IpAction::None => {}
        }

        if !self.config.filter_local && client.is_link_local() {
            debug!(ip = %client.ip(), "link-local client, skipping limiter");
            return Verdict::pass();
        }

        let is_feed = self.paths.is_feed(path);

        if self.config.check_headers && !is_feed {
            if let Some(reason) = classify_headers(path, &req.headers, is_secure(req)) {
                warn!(
                    ip = %client.ip(),
                    network = %client.network(),
                    reason = %reason,
                    "request blocked, headers"
                );
                return Verdict::Block(GateResponse::block(StatusCode::FORBIDDEN, &reason));
            }
        }

        let network = client.network_key();
        let admission = if is_feed {
            self.registry.admit_feed(&network)
        } else {
            match self.config.detection_method {
                DetectionMethod::None => {
                    client.clear_suspicion();
                    self.registry.admit(&network, false)
                }
                DetectionMethod::LinkToken | DetectionMethod::Turnstile => {
                    if self.has_valid_cookie(req, &client) {
                        client.clear_suspicion();
                        self.registry.admit(&network, false)
                    } else {
                        client.mark_suspicious();
                        self.registry.record_client(&network, true);
                        warn!(
                            ip = %client.ip(),
                            network = %network,
                            method = ?self.config.detection_method,
                            "redirecting to challenge page, missing or invalid access cookie"
                        );
                        return Verdict::Challenge(challenge_redirect(req.request_uri()));
                    }
                }
            }
        };

        let mut headers = rate_limit_headers(&admission.status, client.is_suspicious());

        if !admission.allowed {
            warn!(
                ip = %client.ip(),
                network = %network,
                suspicious = client.is_suspicious(),
                "request blocked, exceeded rate limit"
            );
            return Verdict::Block(
                GateResponse::block(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
                    .with_headers(headers),
            );
        }

        append_vary(&mut headers);
        Verdict::Allow { headers }
    }
}

fn challenge_redirect(request_uri: &str) -> GateResponse {
    let encoded: String = url::form_urlencoded::byte_serialize(request_uri.as_bytes()).collect();
    GateResponse::redirect(
        StatusCode::FOUND,
        &format!("{CHALLENGE_PATH}?return_path={encoded}"),
    )
    .no_store()
    .with_vary()
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgate_common::MockClock;
    use chrono::Utc;
    use http::header::{LOCATION, RETRY_AFTER};
    use http::{HeaderValue, Method};

    fn gate(configure: impl FnOnce(&mut LimiterConfig)) -> Gate {
        let mut config = LimiterConfig {
            enabled: true,
            ..LimiterConfig::default()
        };
        configure(&mut config);
        Gate::new(&config, Arc::new(MockClock::new(Utc::now()))).unwrap()
    }

    fn browser(path: &str, remote: &str) -> RequestMeta {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0"));
        headers.insert("accept", HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, deflate, br"));
        headers.insert("accept-language", HeaderValue::from_static("en-US,en;q=0.5"));
        RequestMeta::new(
            Method::GET,
            path.parse().unwrap(),
            headers,
            Some(remote.to_string()),
        )
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let gate = gate(|c| c.enabled = false);
        let req = RequestMeta::new(Method::GET, "/".parse().unwrap(), HeaderMap::new(), None);
        assert!(gate.evaluate(&req).is_allowed());
    }

    #[test]
    fn missing_ip_is_bad_request() {
        let gate = gate(|_| {});
        let req = RequestMeta::new(Method::GET, "/".parse().unwrap(), HeaderMap::new(), None);
        let verdict = gate.evaluate(&req);
        assert_eq!(verdict.response().unwrap().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn excluded_path_skips_block_list() {
        let gate = gate(|c| c.block_list = vec!["9.9.9.0/24".into()]);
        let verdict = gate.evaluate(&browser("/robots.txt", "9.9.9.9:1234"));
        assert!(verdict.is_allowed());
        assert!(gate.registry().is_empty());
    }

    #[test]
    fn block_list_is_forbidden() {
        let gate = gate(|c| c.block_list = vec!["9.9.9.0/24".into()]);
        let verdict = gate.evaluate(&browser("/", "9.9.9.9:1234"));
        let resp = verdict.response().unwrap();
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert!(std::str::from_utf8(&resp.body).unwrap().contains("IP in block-list"));
    }

    #[test]
    fn link_local_passes_unless_filtered() {
        let open = gate(|_| {});
        assert!(open.evaluate(&browser("/", "169.254.1.1:80")).is_allowed());
        assert!(open.registry().is_empty());

        let filtered = gate(|c| c.filter_local = true);
        let verdict = filtered.evaluate(&browser("/", "169.254.1.1:80"));
        assert!(verdict.is_allowed());
        assert_eq!(filtered.registry().len(), 1);
    }

    #[test]
    fn no_detection_allows_with_headers() {
        let gate = gate(|_| {});
        let Verdict::Allow { headers } = gate.evaluate(&browser("/", "5.6.7.8:1000")) else {
            panic!("expected allow");
        };
        assert_eq!(headers["ratelimit-limit"], "120");
        assert_eq!(headers["ratelimit-remaining"], "119");
        assert_eq!(headers["ratelimit-status"], "Normal");
        assert_eq!(headers.get_all("vary").iter().count(), 2);
    }

    #[test]
    fn regular_quota_exhausts_at_burst() {
        let gate = gate(|_| {});
        for _ in 0..120 {
            assert!(gate.evaluate(&browser("/", "5.6.7.8:1000")).is_allowed());
        }
        let verdict = gate.evaluate(&browser("/", "5.6.7.9:1000"));
        let resp = verdict.response().unwrap();
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.header("ratelimit-remaining"), Some("0"));
        assert_eq!(resp.header(RETRY_AFTER), Some("60"));
    }

    #[test]
    fn feed_uses_separate_quota_and_skips_headers() {
        let gate = gate(|_| {});
        let bare = RequestMeta::new(
            Method::GET,
            "/users/1/atom.xml".parse().unwrap(),
            HeaderMap::new(),
            Some("5.6.7.8:1000".into()),
        );
        let Verdict::Allow { headers } = gate.evaluate(&bare) else {
            panic!("feed request should pass header checks");
        };
        assert_eq!(headers["ratelimit-limit"], "90");
        assert!(gate.registry().snapshot("5.6.7.0/24:atom").is_some());
        assert!(gate.registry().snapshot("5.6.7.0/24").is_none());
    }

    #[test]
    fn headerless_request_is_blocked() {
        let gate = gate(|_| {});
        let bare = RequestMeta::new(
            Method::GET,
            "/".parse().unwrap(),
            HeaderMap::new(),
            Some("5.6.7.8:1000".into()),
        );
        let verdict = gate.evaluate(&bare);
        assert_eq!(verdict.response().unwrap().status, StatusCode::FORBIDDEN);
        assert!(gate.registry().is_empty());
    }

    #[test]
    fn missing_cookie_redirects_to_challenge() {
        let gate = gate(|c| {
            c.detection_method = DetectionMethod::LinkToken;
            c.secret = "s3cret".into();
        });
        let verdict = gate.evaluate(&browser("/users/1?tab=2", "1.2.3.4:5555"));
        let Verdict::Challenge(resp) = verdict else {
            panic!("expected challenge redirect");
        };
        assert_eq!(resp.status, StatusCode::FOUND);
        assert_eq!(
            resp.header(LOCATION),
            Some("/limiter/challenge?return_path=%2Fusers%2F1%3Ftab%3D2")
        );
        assert_eq!(resp.header("cache-control"), Some("no-store"));

        let snapshot = gate.registry().snapshot("1.2.3.0/24").unwrap();
        assert_eq!(snapshot.history_count, 1);
        assert_eq!(snapshot.history_suspicious, 1);
        assert_eq!(snapshot.tokens, 90.0);
    }
}
