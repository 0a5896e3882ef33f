//! Redis connection handling for the list store.
//!
//! Keeps one multiplexed connection shared by the publisher side and the
//! dispatch loop, applies a timeout to every round-trip and drops the cached
//! connection after I/O failures so the next call reconnects.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::error::QueueError;

use super::RedisHealth;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    health: Arc<RedisHealth>,
    command_timeout: Duration,
    address: String,
}

impl RedisPool {
    /// Build the client. No connection is dialed until the first command.
    pub fn new(config: &RedisConfig, health: Arc<RedisHealth>) -> Result<Self, QueueError> {
        let info = config.connection_info()?;
        let address = info.addr.to_string();
        let client = Client::open(info)
            .map_err(|e| QueueError::Config(format!("invalid redis configuration: {}", e)))?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            health,
            command_timeout: config.command_timeout(),
            address,
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        let dial = self.client.get_multiplexed_tokio_connection();
        match tokio::time::timeout(self.command_timeout, dial).await {
            Ok(Ok(conn)) => {
                *conn_guard = Some(conn.clone());
                self.health.set_connected();
                tracing::info!(address = %self.address, "Redis connection established");
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.health.record_failure();
                tracing::error!(address = %self.address, error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
            Err(_) => {
                self.health.record_failure();
                tracing::error!(address = %self.address, "Timed out connecting to Redis");
                Err(self.timeout_error("connect"))
            }
        }
    }

    async fn drop_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        if conn_guard.take().is_some() {
            self.health.set_reconnecting();
            tracing::warn!(address = %self.address, "Dropped Redis connection, will reconnect");
        }
    }

    fn timeout_error(&self, operation: &'static str) -> PoolError {
        PoolError::Timeout {
            operation,
            timeout_ms: self.command_timeout.as_millis() as u64,
        }
    }

    /// Run one command with the shared connection, bounded by the command timeout.
    pub async fn execute<F, T, Fut>(&self, operation: &'static str, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match tokio::time::timeout(self.command_timeout, f(conn)).await {
            Ok(Ok(result)) => {
                self.health.record_success();
                Ok(result)
            }
            Ok(Err(e)) => {
                self.health.record_failure();
                if e.is_connection_dropped() || e.is_io_error() {
                    self.drop_connection().await;
                }
                Err(PoolError::Redis(e))
            }
            Err(_) => {
                self.health.record_failure();
                // A timed-out multiplexed connection may have a wedged pipeline
                self.drop_connection().await;
                Err(self.timeout_error(operation))
            }
        }
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute("ping", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), RedisError>(())
        })
        .await
    }

    pub fn health(&self) -> &Arc<RedisHealth> {
        &self.health
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_does_not_dial() {
        let config = RedisConfig {
            address: "localhost:6379".to_string(),
            ..Default::default()
        };
        let health = Arc::new(RedisHealth::new());

        let pool = RedisPool::new(&config, health.clone()).unwrap();
        assert!(pool.address().contains("localhost"));
        assert!(!pool.health().is_healthy());
    }

    #[test]
    fn test_pool_rejects_bad_address() {
        let config = RedisConfig {
            address: "no-port-here".to_string(),
            ..Default::default()
        };
        let result = RedisPool::new(&config, Arc::new(RedisHealth::new()));
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::Timeout {
            operation: "lpush",
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "lpush timed out after 250ms");
    }
}
