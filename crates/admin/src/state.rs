use std::sync::Arc;

use botgate_common::AppConfig;
use botgate_limiter::Gate;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry};

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// State shared by the proxy and the admin API.
pub struct AppState {
    pub config: AppConfig,
    pub metrics: GateMetrics,
    /// Present when the limiter is enabled.
    pub gate: Option<Arc<Gate>>,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics for gate decisions.
pub struct GateMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub requests_blocked: IntCounter,
    pub requests_rate_limited: IntCounter,
    pub challenges_issued: IntCounter,
    pub challenges_solved: IntCounter,
    pub request_duration: HistogramVec,
    /// Refreshed from the registry on every scrape.
    pub tracked_networks: IntGauge,
    pub suspicious_networks: IntGauge,
    pub live_link_tokens: IntGauge,
}

impl GateMetrics {
    /// Create all counters and the duration histogram, registered against a
    /// fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "botgate_requests_total",
            "Total number of requests evaluated",
        ))?;
        let requests_blocked = IntCounter::with_opts(Opts::new(
            "botgate_requests_blocked",
            "Total number of requests refused by the gate",
        ))?;
        let requests_rate_limited = IntCounter::with_opts(Opts::new(
            "botgate_requests_rate_limited",
            "Total number of requests refused for exceeding the network quota",
        ))?;
        let challenges_issued = IntCounter::with_opts(Opts::new(
            "botgate_challenges_issued",
            "Total number of redirects to the challenge page",
        ))?;
        let challenges_solved = IntCounter::with_opts(Opts::new(
            "botgate_challenges_solved",
            "Total number of access cookies issued",
        ))?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "botgate_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;

        let tracked_networks = IntGauge::with_opts(Opts::new(
            "botgate_tracked_networks",
            "Limiters currently held in memory",
        ))?;
        let suspicious_networks = IntGauge::with_opts(Opts::new(
            "botgate_suspicious_networks",
            "Networks currently on the restricted quota",
        ))?;
        let live_link_tokens = IntGauge::with_opts(Opts::new(
            "botgate_live_link_tokens",
            "Issued link tokens not yet redeemed or purged",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_blocked.clone()))?;
        registry.register(Box::new(requests_rate_limited.clone()))?;
        registry.register(Box::new(challenges_issued.clone()))?;
        registry.register(Box::new(challenges_solved.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(tracked_networks.clone()))?;
        registry.register(Box::new(suspicious_networks.clone()))?;
        registry.register(Box::new(live_link_tokens.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            requests_blocked,
            requests_rate_limited,
            challenges_issued,
            challenges_solved,
            request_duration,
            tracked_networks,
            suspicious_networks,
            live_link_tokens,
        })
    }
}

impl AppState {
    pub fn new(config: AppConfig, gate: Option<Arc<Gate>>) -> prometheus::Result<Self> {
        Ok(Self {
            config,
            metrics: GateMetrics::new()?,
            gate,
            start_time: std::time::Instant::now(),
        })
    }
}
