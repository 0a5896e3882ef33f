//! Redis list store backend.
//!
//! Channels are plain Redis lists: publish is LPUSH, consume is RPOP or
//! RPOPLPUSH, so each channel is drained in push order.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::redis::{PoolError, RedisHealthStats, RedisPool};

use super::backend::{MessageStore, StoreError};

pub struct RedisStore {
    pool: Arc<RedisPool>,
}

impl RedisStore {
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    fn map_error(err: PoolError) -> StoreError {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::Timeout {
                operation,
                timeout_ms,
            } => StoreError::Timeout {
                operation,
                timeout_ms,
            },
        }
    }
}

#[async_trait]
impl MessageStore for RedisStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.pool.ping().await.map_err(Self::map_error)
    }

    fn health(&self) -> Option<RedisHealthStats> {
        Some(self.pool.health().stats())
    }

    async fn push(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.pool
            .execute("lpush", |mut conn| async move {
                conn.lpush::<_, _, ()>(channel, payload).await
            })
            .await
            .map_err(Self::map_error)?;

        tracing::trace!(channel = %channel, bytes = payload.len(), "LPUSH");
        Ok(())
    }

    async fn pop_and_requeue(
        &self,
        channel: &str,
        destination: Option<&str>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let result = match destination {
            Some(destination) => {
                self.pool
                    .execute("rpoplpush", |mut conn| async move {
                        conn.rpoplpush::<_, _, Option<Vec<u8>>>(channel, destination)
                            .await
                    })
                    .await
            }
            None => {
                self.pool
                    .execute("rpop", |mut conn| async move {
                        conn.rpop::<_, Option<Vec<u8>>>(channel, None).await
                    })
                    .await
            }
        };

        result.map_err(Self::map_error)
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.pool
            .execute("sadd", |mut conn| async move {
                conn.sadd::<_, _, ()>(set, member).await
            })
            .await
            .map_err(Self::map_error)
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.pool
            .execute("srem", |mut conn| async move {
                conn.srem::<_, _, ()>(set, member).await
            })
            .await
            .map_err(Self::map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::redis::RedisHealth;

    fn create_store(address: &str, timeout_ms: u64) -> RedisStore {
        let config = RedisConfig {
            address: address.to_string(),
            command_timeout_ms: timeout_ms,
            ..Default::default()
        };
        let pool = RedisPool::new(&config, Arc::new(RedisHealth::new())).unwrap();
        RedisStore::new(Arc::new(pool))
    }

    #[test]
    fn test_backend_type() {
        let store = create_store("localhost:6379", 1000);
        assert_eq!(store.backend_type(), "redis");
    }

    #[test]
    fn test_map_timeout_error() {
        let err = RedisStore::map_error(PoolError::Timeout {
            operation: "rpop",
            timeout_ms: 10,
        });
        assert!(matches!(err, StoreError::Timeout { operation: "rpop", .. }));
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_error() {
        // Port 1 is never a Redis server; the dial fails or times out
        let store = create_store("127.0.0.1:1", 500);
        let result = store.ping().await;
        assert!(result.is_err());
        assert!(!store.pool().health().is_healthy());

        let stats = store.health().unwrap();
        assert!(stats.total_failures >= 1);
        assert_eq!(stats.total_connections, 0);
    }
}
