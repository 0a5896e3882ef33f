//! Store backend factory

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::redis::{RedisHealth, RedisPool};

use super::backend::MessageStore;
use super::memory_backend::MemoryStore;
use super::redis_backend::RedisStore;

/// Create a store backend based on configuration.
///
/// - `"redis"` (default): a `RedisStore` for the configured address/password/db
/// - `"memory"`: a process-local `MemoryStore`
///
/// Nothing is dialed here; reachability is checked by `Queue::new`.
pub fn create_store(config: &QueueConfig) -> Result<Arc<dyn MessageStore>, QueueError> {
    match config.backend.as_str() {
        "redis" => {
            let pool = RedisPool::new(&config.redis, Arc::new(RedisHealth::new()))?;
            tracing::info!(
                backend = "redis",
                address = %pool.address(),
                db = config.redis.db,
                "Creating Redis store backend"
            );
            Ok(Arc::new(RedisStore::new(Arc::new(pool))))
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory store backend");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(QueueError::Config(format!("unknown store backend: {}", other))),
    }
}
