//! Network-scoped adaptive rate limiting.
//!
//! Clients are grouped by IP network. Each network key owns a
//! [`NetworkLimiter`]: a token bucket plus a ring buffer of recent client
//! verdicts. When enough of a network's recent clients look suspicious the
//! limiter drops to a slower, smaller bucket; when they stop, it relaxes
//! again. The gap between the two thresholds keeps a network from flapping.
//!
//! All limiters live in a [`NetworkRegistry`], a [`DashMap`](dashmap::DashMap)
//! of individually locked entries. The registry can be snapshotted to JSON on
//! shutdown and restored on start.

pub mod history;
pub mod limiter;
mod persist;
pub mod registry;
pub mod token_bucket;

pub use history::{ClientHistory, HISTORY_CAPACITY};
pub use limiter::{
    BucketParams, LimiterClass, LimiterSnapshot, LimiterTuning, NetworkLimiter, RateLimitStatus,
};
pub use registry::{Admission, NetworkRegistry, RegistryStats, FEED_KEY_SUFFIX};
pub use token_bucket::TokenBucket;
