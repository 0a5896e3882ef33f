//! Redis connectivity
//!
//! - `RedisPool`: shared multiplexed connection with per-command timeouts
//! - `RedisHealth`: connection health tracking
//! - `ExponentialBackoff`: pacing for the dispatch loop while Redis is failing

mod backoff;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
