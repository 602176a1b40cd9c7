use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Plain-HTTP listeners. TLS is terminated in front of the gate.
    pub listen: Vec<String>,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_name")]
    pub name: String,
    pub servers: Vec<UpstreamServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// How suspicious clients prove they are human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    /// Everyone is treated as a regular client; only rate limits apply.
    #[default]
    None,
    /// A challenge page whose stylesheet URL carries a single-use token.
    LinkToken,
    /// A third-party widget verified server-side (Cloudflare Turnstile).
    #[serde(alias = "third-party")]
    Turnstile,
}

impl DetectionMethod {
    pub fn is_enabled(self) -> bool {
        self != DetectionMethod::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Where the registry snapshot is written on shutdown and read on start.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Exact IPs or CIDR ranges that skip all checks.
    #[serde(default)]
    pub pass_list: Vec<String>,
    /// Exact IPs or CIDR ranges that are always refused.
    #[serde(default)]
    pub block_list: Vec<String>,
    /// When false, link-local clients are let through untouched.
    #[serde(default)]
    pub filter_local: bool,
    #[serde(default = "default_ipv4_prefix")]
    pub ipv4_prefix: u8,
    #[serde(default = "default_ipv6_prefix")]
    pub ipv6_prefix: u8,
    #[serde(default = "default_true")]
    pub check_headers: bool,
    #[serde(default)]
    pub detection_method: DetectionMethod,
    /// Signing secret for the access cookie.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub cookie: CookieConfig,
    #[serde(default)]
    pub turnstile: TurnstileConfig,
    /// Path prefixes that bypass the gate entirely.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,
    /// Path fragments that mark a feed request.
    #[serde(default = "default_feed_markers")]
    pub feed_markers: Vec<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_file: default_state_file(),
            pass_list: Vec::new(),
            block_list: Vec::new(),
            filter_local: false,
            ipv4_prefix: default_ipv4_prefix(),
            ipv6_prefix: default_ipv6_prefix(),
            check_headers: true,
            detection_method: DetectionMethod::None,
            secret: String::new(),
            cookie: CookieConfig::default(),
            turnstile: TurnstileConfig::default(),
            excluded_paths: default_excluded_paths(),
            feed_markers: default_feed_markers(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default = "default_same_site")]
    pub same_site: SameSite,
    /// Always mark the cookie `Secure`. When false it is only marked on
    /// secure connections.
    #[serde(default = "default_true")]
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            same_site: default_same_site(),
            secure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    #[serde(default)]
    pub site_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_turnstile_verify_url")]
    pub verify_url: String,
    #[serde(default = "default_turnstile_timeout")]
    pub timeout_secs: u64,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            site_key: String::new(),
            secret_key: String::new(),
            verify_url: default_turnstile_verify_url(),
            timeout_secs: default_turnstile_timeout(),
        }
    }
}

// Default value helpers
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_weight() -> u32 {
    1
}
fn default_upstream_name() -> String {
    "default".to_string()
}
fn default_state_file() -> PathBuf {
    PathBuf::from("./data/limiter_state.json")
}
fn default_ipv4_prefix() -> u8 {
    24
}
fn default_ipv6_prefix() -> u8 {
    48
}
fn default_cookie_name() -> String {
    "botgate_ping".to_string()
}
fn default_same_site() -> SameSite {
    SameSite::Lax
}
fn default_turnstile_verify_url() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}
fn default_turnstile_timeout() -> u64 {
    10
}
fn default_excluded_paths() -> Vec<String> {
    [
        "/limiter/",
        "/proxy/",
        "/about",
        "/css/",
        "/fonts/",
        "/icons/",
        "/img/",
        "/js/",
        "/manifest.json",
        "/robots.txt",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_feed_markers() -> Vec<String> {
    vec!["/atom.xml".to_string()]
}

const REDACTED: &str = "[REDACTED]";

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen must have at least one address");
        }

        if self.upstream.servers.is_empty() {
            anyhow::bail!("upstream '{}' has no servers", self.upstream.name);
        }

        self.limiter.validate()
    }

    /// A copy safe to show to operators, with secrets masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        mask(&mut copy.limiter.secret);
        mask(&mut copy.limiter.turnstile.secret_key);
        copy
    }
}

fn mask(value: &mut String) {
    if !value.is_empty() {
        *value = REDACTED.to_string();
    }
}

impl LimiterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ipv4_prefix > 32 {
            anyhow::bail!(
                "limiter.ipv4_prefix must be between 0 and 32, got {}",
                self.ipv4_prefix
            );
        }
        if self.ipv6_prefix > 128 {
            anyhow::bail!(
                "limiter.ipv6_prefix must be between 0 and 128, got {}",
                self.ipv6_prefix
            );
        }

        if !self.enabled {
            return Ok(());
        }

        if self.state_file.as_os_str().is_empty() {
            anyhow::bail!("limiter.state_file must be set when the limiter is enabled");
        }

        if self.detection_method.is_enabled() && self.secret.is_empty() {
            anyhow::bail!(
                "limiter.secret is required for detection method {:?}",
                self.detection_method
            );
        }

        if self.detection_method == DetectionMethod::Turnstile
            && (self.turnstile.site_key.is_empty() || self.turnstile.secret_key.is_empty())
        {
            anyhow::bail!("limiter.turnstile.site_key and secret_key are required for turnstile");
        }

        if self.cookie.name.is_empty() {
            anyhow::bail!("limiter.cookie.name must not be empty");
        }

        Ok(())
    }
}
