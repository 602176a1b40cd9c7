use std::sync::Arc;
use std::time::Instant;

use botgate_challenge::LinkTokenStore;
use botgate_rate_limit::NetworkRegistry;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Rate gate for the periodic sweep, driven by request traffic.
///
/// The first call only records the time; later calls return true at most
/// once per interval.
#[derive(Debug)]
pub struct MaintenanceTimer {
    last_run: Mutex<Option<DateTime<Utc>>>,
    interval: Duration,
}

impl MaintenanceTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_run: Mutex::new(None),
            interval,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let mut last_run = self.last_run.lock();
        match *last_run {
            None => {
                *last_run = Some(now);
                false
            }
            Some(prev) if now - prev < self.interval => false,
            Some(_) => {
                *last_run = Some(now);
                true
            }
        }
    }
}

/// Drop idle limiters and stale link tokens.
pub fn sweep(registry: &NetworkRegistry, link_tokens: &LinkTokenStore) {
    let started = Instant::now();
    let limiters = registry.cleanup_expired();
    let tokens = link_tokens.purge_expired();
    info!(
        removed_limiters = limiters,
        removed_tokens = tokens,
        remaining = registry.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "limiter maintenance finished"
    );
}

/// Run the sweep off the request path when a runtime is available,
/// otherwise inline.
pub fn spawn_sweep(registry: Arc<NetworkRegistry>, link_tokens: Arc<LinkTokenStore>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            debug!("scheduling limiter maintenance");
            handle.spawn_blocking(move || sweep(&registry, &link_tokens));
        }
        Err(_) => sweep(&registry, &link_tokens),
    }
}
