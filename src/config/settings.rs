use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::QueueError;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Construction options for a [`crate::queue::Queue`].
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Label of this queue instance
    #[serde(default = "default_name")]
    pub name: String,
    /// Legacy single default channel, registered at construction
    #[serde(default)]
    pub channel: Option<String>,
    /// Channels registered at construction, in polling order
    #[serde(default)]
    pub channels: Vec<String>,
    /// Store backend: "redis" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// `host:port` or a full `redis://` URL
    #[serde(default = "default_redis_address")]
    pub address: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Timeout applied to every round-trip, in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

/// What the engine does when a consumer's conduit is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait up to `delivery_timeout_ms`, then drop the message for that consumer
    BlockWithTimeout,
    /// Drop the message for that consumer immediately
    DropNewest,
}

/// What add-channel / add-consumer do with a name that is already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Idle sleep after a cycle that delivered nothing
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Buffer size of each consumer's conduit
    #[serde(default = "default_conduit_capacity")]
    pub conduit_capacity: usize,
    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,
    /// Destination list for pop-and-requeue. `None` removes without reinsertion.
    #[serde(default)]
    pub requeue_list: Option<String>,
    #[serde(default = "default_duplicates")]
    pub duplicates: DuplicatePolicy,
    /// Capacity of the observability event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit logs as JSON lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_name() -> String {
    "nmq".to_string()
}

fn default_backend() -> String {
    "redis".to_string()
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_command_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_conduit_capacity() -> usize {
    128
}

fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::BlockWithTimeout
}

fn default_delivery_timeout() -> u64 {
    1000
}

fn default_duplicates() -> DuplicatePolicy {
    DuplicatePolicy::Reject
}

fn default_event_buffer() -> usize {
    256
}

fn default_backoff_initial() -> u64 {
    100
}

fn default_backoff_max() -> u64 {
    30_000 // 30 seconds
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "nmq".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("queue.name", "nmq")?
            .set_default("queue.redis.address", "127.0.0.1:6379")?
            .set_default("queue.dispatch.poll_interval_ms", 500)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NMQ__QUEUE__REDIS__ADDRESS, NMQ__QUEUE__CHANNELS=a,b, NMQ__OTEL__ENABLED, ...
            .add_source(
                Environment::with_prefix("NMQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("queue.channels"),
            );

        builder.build()?.try_deserialize()
    }
}

impl QueueConfig {
    /// Config with every default and the given label.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.dispatch.conduit_capacity == 0 {
            return Err(QueueError::Config(
                "dispatch.conduit_capacity must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.poll_interval_ms == 0 {
            return Err(QueueError::Config(
                "dispatch.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.event_buffer == 0 {
            return Err(QueueError::Config(
                "dispatch.event_buffer must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.backoff_initial_delay_ms > self.dispatch.backoff_max_delay_ms {
            return Err(QueueError::Config(
                "dispatch.backoff_initial_delay_ms exceeds backoff_max_delay_ms".to_string(),
            ));
        }
        if let Some(list) = &self.dispatch.requeue_list {
            if list.is_empty() {
                return Err(QueueError::Config(
                    "dispatch.requeue_list must not be empty when set".to_string(),
                ));
            }
        }
        match self.backend.as_str() {
            "redis" => {
                self.redis.connection_info()?;
            }
            "memory" => {}
            other => {
                return Err(QueueError::Config(format!("unknown store backend: {}", other)));
            }
        }
        Ok(())
    }

    /// Channels to register at construction: the legacy `channel` first, then `channels`.
    pub fn initial_channels(&self) -> Vec<String> {
        self.channel
            .iter()
            .chain(self.channels.iter())
            .filter(|c| !c.is_empty())
            .cloned()
            .collect()
    }
}

impl RedisConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Build the client connection info from the address, password and db.
    pub fn connection_info(&self) -> Result<redis::ConnectionInfo, QueueError> {
        use redis::IntoConnectionInfo;

        let address = if self.address.trim().is_empty() {
            default_redis_address()
        } else {
            self.address.trim().to_string()
        };

        if address.starts_with("redis://") || address.starts_with("rediss://") {
            return address
                .as_str()
                .into_connection_info()
                .map_err(|e| QueueError::Config(format!("invalid redis url: {}", e)));
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| QueueError::Config(format!("redis address missing port: {}", address)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| QueueError::Config(format!("invalid redis port in address: {}", address)))?;
        if host.is_empty() {
            return Err(QueueError::Config(format!("redis address missing host: {}", address)));
        }

        Ok(redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(host.to_string(), port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        })
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            channel: None,
            channels: vec![],
            backend: default_backend(),
            redis: RedisConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            password: None,
            db: 0,
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            conduit_capacity: default_conduit_capacity(),
            overflow: default_overflow(),
            delivery_timeout_ms: default_delivery_timeout(),
            requeue_list: None,
            duplicates: default_duplicates(),
            event_buffer: default_event_buffer(),
            backoff_initial_delay_ms: default_backoff_initial(),
            backoff_max_delay_ms: default_backoff_max(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = QueueConfig::default();
        assert_eq!(config.name, "nmq");
        assert_eq!(config.redis.address, "127.0.0.1:6379");
        assert_eq!(config.redis.db, 0);
        assert_eq!(config.dispatch.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.dispatch.duplicates, DuplicatePolicy::Reject);
        assert!(config.dispatch.requeue_list.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = QueueConfig::default();
        config.dispatch.conduit_capacity = 0;
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = QueueConfig::default();
        config.dispatch.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = QueueConfig {
            backend: "kafka".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_initial_channels_puts_legacy_channel_first() {
        let config = QueueConfig {
            channel: Some("legacy".to_string()),
            channels: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(config.initial_channels(), vec!["legacy", "a", "b"]);
    }

    #[test]
    fn test_connection_info_from_host_port() {
        let redis = RedisConfig {
            address: "localhost:6380".to_string(),
            password: Some("secret".to_string()),
            db: 3,
            ..Default::default()
        };
        let info = redis.connection_info().unwrap();
        assert!(matches!(info.addr, redis::ConnectionAddr::Tcp(ref host, 6380) if host == "localhost"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_connection_info_empty_address_uses_default() {
        let redis = RedisConfig {
            address: String::new(),
            ..Default::default()
        };
        let info = redis.connection_info().unwrap();
        assert!(matches!(info.addr, redis::ConnectionAddr::Tcp(ref host, 6379) if host == "127.0.0.1"));
    }

    #[test]
    fn test_connection_info_bad_port() {
        let redis = RedisConfig {
            address: "localhost:http".to_string(),
            ..Default::default()
        };
        assert!(redis.connection_info().is_err());
    }
}
