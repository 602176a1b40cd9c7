use chrono::{DateTime, Utc};

/// A single token bucket driven by externally supplied timestamps.
///
/// The bucket refills at `rate` tokens per second up to `burst` tokens. Time
/// only ever moves forward for the bucket: a timestamp older than the last
/// refill adds nothing.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate: f64, burst: u32, now: DateTime<Utc>) -> Self {
        Self {
            rate,
            burst: burst as f64,
            tokens: burst as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Change rate and capacity. Tokens accrued so far are kept, clamped to
    /// the new capacity.
    pub fn set_limits(&mut self, rate: f64, burst: u32, now: DateTime<Utc>) {
        self.refill(now);
        self.rate = rate;
        self.burst = burst as f64;
        self.tokens = self.tokens.min(self.burst);
    }

    /// Tokens available at `now`, without consuming anything.
    pub fn tokens_at(&self, now: DateTime<Utc>) -> f64 {
        let mut probe = self.clone();
        probe.refill(now);
        probe.tokens
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }
}
