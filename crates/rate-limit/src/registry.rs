use std::sync::Arc;

use botgate_common::Clock;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::limiter::{LimiterClass, LimiterSnapshot, LimiterTuning, NetworkLimiter, RateLimitStatus};

/// Suffix separating the feed quota from the regular one for a network.
pub const FEED_KEY_SUFFIX: &str = ":atom";

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub status: RateLimitStatus,
}

/// Aggregate counts for the admin API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub networks: usize,
    pub suspicious_networks: usize,
    pub feed_limiters: usize,
}

/// Concurrent map of network key to limiter.
///
/// Entries are created at most once per key and mutated only under their own
/// lock. Request paths clone the entry out of the map before locking it, so
/// they never hold a shard guard and an entry lock at once.
pub struct NetworkRegistry {
    pub(crate) limiters: DashMap<String, Arc<Mutex<NetworkLimiter>>>,
    pub(crate) clock: Arc<dyn Clock>,
    tuning: LimiterTuning,
}

impl NetworkRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_tuning(clock, LimiterTuning::default())
    }

    pub fn with_tuning(clock: Arc<dyn Clock>, tuning: LimiterTuning) -> Self {
        info!(
            regular_rate = tuning.regular.rate,
            regular_burst = tuning.regular.burst,
            suspicious_rate = tuning.suspicious.rate,
            suspicious_burst = tuning.suspicious.burst,
            "creating network limiter registry"
        );
        Self {
            limiters: DashMap::new(),
            clock,
            tuning,
        }
    }

    pub fn tuning(&self) -> &LimiterTuning {
        &self.tuning
    }

    /// Fetch the limiter for `key`, creating it with `class` if absent.
    fn entry(&self, key: &str, class: LimiterClass) -> Arc<Mutex<NetworkLimiter>> {
        if let Some(existing) = self.limiters.get(key) {
            return Arc::clone(existing.value());
        }

        let now = self.clock.now();
        let entry = self.limiters.entry(key.to_string()).or_insert_with(|| {
            debug!(network = key, ?class, "creating limiter");
            Arc::new(Mutex::new(NetworkLimiter::new(key, class, &self.tuning, now)))
        });
        Arc::clone(entry.value())
    }

    fn class_for(client_suspicious: bool) -> LimiterClass {
        if client_suspicious {
            LimiterClass::Suspicious
        } else {
            LimiterClass::Regular
        }
    }

    /// Record a client verdict for `network` without spending a token.
    pub fn record_client(&self, network: &str, client_suspicious: bool) -> RateLimitStatus {
        let limiter = self.entry(network, Self::class_for(client_suspicious));
        let now = self.clock.now();

        let mut limiter = limiter.lock();
        limiter.touch(now);
        limiter.record(client_suspicious, &self.tuning, now);
        limiter.status(now)
    }

    /// Record the verdict and try to spend one token, as a single step.
    pub fn admit(&self, network: &str, client_suspicious: bool) -> Admission {
        let limiter = self.entry(network, Self::class_for(client_suspicious));
        let now = self.clock.now();

        let mut limiter = limiter.lock();
        limiter.touch(now);
        limiter.record(client_suspicious, &self.tuning, now);
        let allowed = limiter.try_acquire(now);
        if !allowed {
            warn!(network, suspicious = limiter.is_suspicious(), "rate limit exceeded");
        }
        Admission {
            allowed,
            status: limiter.status(now),
        }
    }

    /// Spend one token from the fixed feed quota of `network`.
    pub fn admit_feed(&self, network: &str) -> Admission {
        let key = format!("{network}{FEED_KEY_SUFFIX}");
        let limiter = self.entry(&key, LimiterClass::Feed);
        let now = self.clock.now();

        let mut limiter = limiter.lock();
        limiter.touch(now);
        let allowed = limiter.try_acquire(now);
        if !allowed {
            warn!(network = %key, "feed rate limit exceeded");
        }
        Admission {
            allowed,
            status: limiter.status(now),
        }
    }

    /// Drop limiters idle for longer than the expiry, plus any entry whose
    /// stored network disagrees with its key. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let expiry = self.tuning.expiry;

        let stale: Vec<String> = self
            .limiters
            .iter()
            .filter_map(|entry| {
                let limiter = entry.value().lock();
                if limiter.network() != entry.key() {
                    warn!(key = %entry.key(), network = limiter.network(), "found corrupt limiter entry");
                    return Some(entry.key().clone());
                }
                limiter
                    .is_expired(now, expiry)
                    .then(|| entry.key().clone())
            })
            .collect();

        let mut removed = 0;
        for key in stale {
            let gone = self.limiters.remove_if(&key, |k, limiter| {
                let limiter = limiter.lock();
                limiter.network() != k || limiter.is_expired(now, expiry)
            });
            if gone.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, remaining = self.limiters.len(), "cleaned up expired limiters");
        }
        removed
    }

    pub fn snapshot(&self, key: &str) -> Option<LimiterSnapshot> {
        let limiter = self.limiters.get(key).map(|e| Arc::clone(e.value()))?;
        let now = self.clock.now();
        let snapshot = limiter.lock().snapshot(now);
        Some(snapshot)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.limiters.iter() {
            stats.networks += 1;
            if entry.key().ends_with(FEED_KEY_SUFFIX) {
                stats.feed_limiters += 1;
            } else if entry.value().lock().is_suspicious() {
                stats.suspicious_networks += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
