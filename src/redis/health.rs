//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::current_time_ms;

/// Redis connection health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RedisHealthStatus {
    /// Connection established and last round-trip succeeded
    Healthy = 0,
    /// No cached connection, next call will dial
    Reconnecting = 1,
    /// Last dial or round-trip failed
    Unreachable = 2,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::Unreachable => "unreachable",
        }
    }
}

impl From<u8> for RedisHealthStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::Unreachable,
            _ => RedisHealthStatus::Reconnecting,
        }
    }
}

/// Redis health tracker shared by the pool and anyone who wants to report on it.
pub struct RedisHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    consecutive_failures: AtomicU32,
    total_connections: AtomicU32,
    total_failures: AtomicU64,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting as u8),
            last_connected: AtomicI64::new(0),
            consecutive_failures: AtomicU32::new(0),
            total_connections: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// A new connection was dialed successfully
    pub fn set_connected(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.last_connected
            .store(current_time_ms(), Ordering::Release);
        self.total_connections.fetch_add(1, Ordering::AcqRel);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// A round-trip on an existing connection succeeded
    pub fn record_success(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// The cached connection was dropped
    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
    }

    /// A dial or round-trip failed
    pub fn record_failure(&self) {
        self.status
            .store(RedisHealthStatus::Unreachable as u8, Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        self.total_failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn stats(&self) -> RedisHealthStats {
        RedisHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected.load(Ordering::Acquire),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_connections: self.total_connections.load(Ordering::Acquire),
            total_failures: self.total_failures.load(Ordering::Acquire),
        }
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis health statistics
#[derive(Debug, Clone)]
pub struct RedisHealthStats {
    pub status: RedisHealthStatus,
    pub last_connected_ms: i64,
    pub consecutive_failures: u32,
    pub total_connections: u32,
    pub total_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_health_status() {
        let health = RedisHealth::new();
        assert_eq!(health.status(), RedisHealthStatus::Reconnecting);
        assert!(!health.is_healthy());

        health.set_connected();
        assert!(health.is_healthy());

        health.record_failure();
        assert_eq!(health.status(), RedisHealthStatus::Unreachable);

        health.record_success();
        assert_eq!(health.status(), RedisHealthStatus::Healthy);
    }

    #[test]
    fn test_redis_health_stats() {
        let health = RedisHealth::new();

        health.record_failure();
        health.record_failure();
        let stats = health.stats();
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.total_failures, 2);

        health.set_connected();
        let stats = health.stats();
        assert_eq!(stats.status, RedisHealthStatus::Healthy);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_connections, 1);
        assert!(stats.last_connected_ms > 0);
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(RedisHealthStatus::Unreachable.as_str(), "unreachable");
        assert_eq!(RedisHealthStatus::from(7), RedisHealthStatus::Reconnecting);
    }
}
