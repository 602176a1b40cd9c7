use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::ClientHistory;
use crate::token_bucket::TokenBucket;

/// Rate and capacity for one class of limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Tokens per second.
    pub rate: f64,
    pub burst: u32,
}

/// Which quota a limiter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterClass {
    Regular,
    Suspicious,
    Feed,
}

/// Constants governing limiter behavior.
#[derive(Debug, Clone)]
pub struct LimiterTuning {
    pub regular: BucketParams,
    pub suspicious: BucketParams,
    pub feed: BucketParams,
    /// Suspicious ratio at or above which a regular network is restricted.
    pub restrict_threshold: f64,
    /// Suspicious ratio at or below which a restricted network is relaxed.
    pub relax_threshold: f64,
    /// Idle time after which a limiter is dropped.
    pub expiry: Duration,
    /// Minimum spacing between maintenance sweeps.
    pub cleanup_interval: Duration,
}

impl Default for LimiterTuning {
    fn default() -> Self {
        Self {
            regular: BucketParams {
                rate: 2.0,
                burst: 120,
            },
            suspicious: BucketParams {
                rate: 0.1,
                burst: 90,
            },
            feed: BucketParams {
                rate: 1.0,
                burst: 90,
            },
            restrict_threshold: 0.6,
            relax_threshold: 0.2,
            expiry: Duration::hours(1),
            cleanup_interval: Duration::minutes(5),
        }
    }
}

impl LimiterTuning {
    pub fn params(&self, class: LimiterClass) -> BucketParams {
        match class {
            LimiterClass::Regular => self.regular,
            LimiterClass::Suspicious => self.suspicious,
            LimiterClass::Feed => self.feed,
        }
    }
}

/// Rate-limit figures reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Bucket capacity.
    pub limit: u32,
    /// Whole tokens left.
    pub remaining: u32,
    /// Seconds until the bucket is full again.
    pub reset_secs: u64,
}

impl RateLimitStatus {
    /// `Retry-After` value, present only once the bucket is drained.
    pub fn retry_after(&self) -> Option<u64> {
        (self.remaining == 0).then_some(self.reset_secs)
    }
}

/// Token bucket plus adaptive suspicion state for one network key.
#[derive(Debug, Clone)]
pub struct NetworkLimiter {
    network: String,
    bucket: TokenBucket,
    last_access: DateTime<Utc>,
    is_suspicious: bool,
    history: ClientHistory,
}

impl NetworkLimiter {
    pub fn new(network: impl Into<String>, class: LimiterClass, tuning: &LimiterTuning, now: DateTime<Utc>) -> Self {
        let params = tuning.params(class);
        Self {
            network: network.into(),
            bucket: TokenBucket::new(params.rate, params.burst, now),
            last_access: now,
            is_suspicious: class == LimiterClass::Suspicious,
            history: ClientHistory::new(),
        }
    }

    /// Rebuild a limiter from persisted fields. The bucket starts full.
    pub fn restore(
        network: String,
        rate: f64,
        burst: u32,
        last_access: DateTime<Utc>,
        is_suspicious: bool,
        history: ClientHistory,
        now: DateTime<Utc>,
    ) -> Self {
        if !history.is_consistent() {
            warn!(network = %network, "resetting inconsistent client history");
        }
        Self {
            network,
            bucket: TokenBucket::new(rate, burst, now),
            last_access,
            is_suspicious,
            history: history.sanitized(),
        }
    }

    /// Add a client verdict to the history and re-evaluate the class.
    pub fn record(&mut self, client_suspicious: bool, tuning: &LimiterTuning, now: DateTime<Utc>) {
        self.history.push(client_suspicious);

        let Some(ratio) = self.history.suspicious_ratio() else {
            return;
        };

        if self.is_suspicious && ratio <= tuning.relax_threshold {
            let params = tuning.regular;
            self.bucket.set_limits(params.rate, params.burst, now);
            self.is_suspicious = false;
            info!(network = %self.network, ratio, "relaxed rate limiter for network");
        } else if !self.is_suspicious && ratio >= tuning.restrict_threshold {
            let params = tuning.suspicious;
            self.bucket.set_limits(params.rate, params.burst, now);
            self.is_suspicious = true;
            warn!(network = %self.network, ratio, "restricted rate limiter for network");
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_access {
            self.last_access = now;
        }
    }

    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.bucket.try_consume(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let burst = self.bucket.burst();
        let tokens = self.bucket.tokens_at(now);
        let remaining = tokens.min(burst as f64).max(0.0).floor() as u32;

        let missing = burst as f64 - tokens;
        let rate = self.bucket.rate();
        let reset_secs = if missing > 0.0 && rate > 0.0 {
            (missing / rate).ceil() as u64
        } else {
            0
        };

        RateLimitStatus {
            limit: burst,
            remaining,
            reset_secs,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        now - self.last_access > expiry
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_suspicious(&self) -> bool {
        self.is_suspicious
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.last_access
    }

    pub fn history(&self) -> &ClientHistory {
        &self.history
    }

    pub fn rate(&self) -> f64 {
        self.bucket.rate()
    }

    pub fn burst(&self) -> u32 {
        self.bucket.burst()
    }
}

/// Point-in-time view of a limiter, for stats and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    pub network: String,
    pub is_suspicious: bool,
    pub rate: f64,
    pub burst: u32,
    pub tokens: f64,
    pub history_count: usize,
    pub history_suspicious: usize,
    pub last_access: DateTime<Utc>,
}

impl NetworkLimiter {
    pub fn snapshot(&self, now: DateTime<Utc>) -> LimiterSnapshot {
        LimiterSnapshot {
            network: self.network.clone(),
            is_suspicious: self.is_suspicious,
            rate: self.rate(),
            burst: self.burst(),
            tokens: self.bucket.tokens_at(now),
            history_count: self.history.count(),
            history_suspicious: self.history.suspicious(),
            last_access: self.last_access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HISTORY_CAPACITY;

    fn regular(now: DateTime<Utc>) -> NetworkLimiter {
        NetworkLimiter::new("1.2.3.0/24", LimiterClass::Regular, &LimiterTuning::default(), now)
    }

    #[test]
    fn restricts_at_sixty_percent() {
        let tuning = LimiterTuning::default();
        let now = Utc::now();
        let mut limiter = regular(now);

        for _ in 0..36 {
            limiter.record(true, &tuning, now);
        }
        for _ in 0..23 {
            limiter.record(false, &tuning, now);
        }
        assert!(!limiter.is_suspicious(), "no decision before the buffer is full");

        limiter.record(false, &tuning, now);
        assert_eq!(limiter.history().count(), HISTORY_CAPACITY);
        assert!(limiter.is_suspicious(), "36/60 = 0.6 restricts");
        assert_eq!(limiter.burst(), 90);
        assert_eq!(limiter.rate(), 0.1);
    }

    #[test]
    fn stays_regular_just_below_threshold() {
        let tuning = LimiterTuning::default();
        let now = Utc::now();
        let mut limiter = regular(now);

        for i in 0..60 {
            limiter.record(i < 35, &tuning, now);
        }
        assert!(!limiter.is_suspicious());
    }

    #[test]
    fn relaxes_at_twenty_percent() {
        let tuning = LimiterTuning::default();
        let now = Utc::now();
        let mut limiter =
            NetworkLimiter::new("1.2.3.0/24", LimiterClass::Suspicious, &tuning, now);

        for i in 0..60 {
            limiter.record(i < 12, &tuning, now);
        }
        assert!(!limiter.is_suspicious(), "12/60 = 0.2 relaxes");
        assert_eq!(limiter.burst(), 120);
    }

    #[test]
    fn no_flapping_between_thresholds() {
        let tuning = LimiterTuning::default();
        let now = Utc::now();
        let mut limiter =
            NetworkLimiter::new("1.2.3.0/24", LimiterClass::Suspicious, &tuning, now);

        for i in 0..120 {
            limiter.record(i % 5 < 2, &tuning, now);
        }
        assert!(limiter.is_suspicious(), "40% keeps the current class");
    }

    #[test]
    fn status_headers_math() {
        let now = Utc::now();
        let mut limiter = regular(now);

        let full = limiter.status(now);
        assert_eq!(full.limit, 120);
        assert_eq!(full.remaining, 120);
        assert_eq!(full.reset_secs, 0);
        assert_eq!(full.retry_after(), None);

        for _ in 0..120 {
            assert!(limiter.try_acquire(now));
        }
        let drained = limiter.status(now);
        assert_eq!(drained.remaining, 0);
        assert_eq!(drained.reset_secs, 60);
        assert_eq!(drained.retry_after(), Some(60));
    }

    #[test]
    fn reset_rounds_up() {
        let now = Utc::now();
        let mut limiter = regular(now);
        limiter.try_acquire(now);
        // One token missing at 2 tokens/s is half a second.
        assert_eq!(limiter.status(now).reset_secs, 1);
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let limiter = regular(now);
        let hour = Duration::hours(1);
        assert!(!limiter.is_expired(now + hour, hour));
        assert!(limiter.is_expired(now + hour + Duration::seconds(1), hour));
    }
}
