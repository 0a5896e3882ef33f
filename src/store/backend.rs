//! Backend trait for the remote list store.
//!
//! This is the only seam that touches the backing store. Everything the
//! queue needs from it is a push, an atomic pop-and-requeue, and two set
//! operations for consumer membership markers.

use async_trait::async_trait;
use thiserror::Error;

use crate::redis::RedisHealthStats;

/// Errors that can occur during store round-trips.
///
/// An empty list is not an error: `pop_and_requeue` returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Round-trip did not complete within the command timeout
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Store cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Server-side rejections (wrong key type, auth failures) are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            StoreError::Timeout { .. } | StoreError::Unavailable(_) => true,
        }
    }
}

/// Backend trait for the list store.
///
/// Implementations must be `Send + Sync`: the façade and the dispatch
/// engine share one instance across tasks.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Short identifier used in logs ("redis", "memory").
    fn backend_type(&self) -> &'static str;

    /// Reachability check, used once at queue construction.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Push a payload onto the head of `channel` (LPUSH).
    async fn push(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Atomically remove the tail of `channel`.
    ///
    /// With a `destination` the element is reinserted at the head of that
    /// list in the same operation (RPOPLPUSH); without one it is simply
    /// removed. Returns `Ok(None)` when `channel` is empty.
    async fn pop_and_requeue(
        &self,
        channel: &str,
        destination: Option<&str>,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Add `member` to the set stored at `set` (SADD).
    async fn add_member(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// Remove `member` from the set stored at `set` (SREM).
    async fn remove_member(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// Connection health, for backends that keep a connection.
    fn health(&self) -> Option<RedisHealthStats> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let err = StoreError::Timeout {
            operation: "rpop",
            timeout_ms: 100,
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "rpop timed out after 100ms");
    }

    #[test]
    fn test_server_rejection_is_not_transient() {
        let err = StoreError::Redis(redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
        )));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = StoreError::Redis(redis::RedisError::from(io));
        assert!(err.is_transient());
    }
}
