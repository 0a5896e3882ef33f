//! Dispatch engine health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::redis::current_time_ms;

use super::engine::CycleReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStatus {
    /// Never started
    Idle = 0,
    Running = 1,
    /// Running, but the last cycle failed on every channel
    Degraded = 2,
    Stopped = 3,
}

impl From<u8> for EngineStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => EngineStatus::Running,
            2 => EngineStatus::Degraded,
            3 => EngineStatus::Stopped,
            _ => EngineStatus::Idle,
        }
    }
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Running => "running",
            EngineStatus::Degraded => "degraded",
            EngineStatus::Stopped => "stopped",
        }
    }
}

pub struct EngineHealth {
    status: AtomicU8,
    cycles: AtomicU64,
    messages: AtomicU64,
    poll_failures: AtomicU64,
    consecutive_failed_cycles: AtomicU32,
    last_cycle_ms: AtomicI64,
}

impl EngineHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(EngineStatus::Idle as u8),
            cycles: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            consecutive_failed_cycles: AtomicU32::new(0),
            last_cycle_ms: AtomicI64::new(0),
        }
    }

    /// Claim the engine. Fails if a loop or a single cycle already holds it.
    ///
    /// The returned guard sets the status to `release_to` when dropped, or
    /// back to the status it replaced when `release_to` is `None`. Dropping
    /// includes cancellation of the future that owns it and task panics.
    pub(crate) fn try_claim(self: &Arc<Self>, release_to: Option<EngineStatus>) -> Option<EngineClaim> {
        let current = self.status.load(Ordering::Acquire);
        if matches!(
            EngineStatus::from(current),
            EngineStatus::Running | EngineStatus::Degraded
        ) {
            return None;
        }
        self.status
            .compare_exchange(
                current,
                EngineStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        Some(EngineClaim {
            health: self.clone(),
            release_to: release_to.unwrap_or_else(|| EngineStatus::from(current)),
        })
    }

    pub(crate) fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::AcqRel);
        self.messages
            .fetch_add(report.received as u64, Ordering::AcqRel);
        self.poll_failures
            .fetch_add(report.failed as u64, Ordering::AcqRel);
        self.last_cycle_ms
            .store(current_time_ms(), Ordering::Release);

        let next = if report.all_failed() {
            self.consecutive_failed_cycles
                .fetch_add(1, Ordering::AcqRel);
            EngineStatus::Degraded
        } else {
            self.consecutive_failed_cycles.store(0, Ordering::Release);
            EngineStatus::Running
        };

        // Only a running engine moves between Running and Degraded
        let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
            match EngineStatus::from(s) {
                EngineStatus::Running | EngineStatus::Degraded => Some(next as u8),
                _ => None,
            }
        });
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), EngineStatus::Running | EngineStatus::Degraded)
    }

    pub fn stats(&self) -> EngineHealthStats {
        EngineHealthStats {
            status: self.status(),
            cycles: self.cycles.load(Ordering::Acquire),
            messages: self.messages.load(Ordering::Acquire),
            poll_failures: self.poll_failures.load(Ordering::Acquire),
            consecutive_failed_cycles: self.consecutive_failed_cycles.load(Ordering::Acquire),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Acquire),
        }
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on the engine; releases the status when dropped.
pub(crate) struct EngineClaim {
    health: Arc<EngineHealth>,
    release_to: EngineStatus,
}

impl Drop for EngineClaim {
    fn drop(&mut self) {
        self.health
            .status
            .store(self.release_to as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct EngineHealthStats {
    pub status: EngineStatus,
    pub cycles: u64,
    /// Messages popped across all channels
    pub messages: u64,
    pub poll_failures: u64,
    pub consecutive_failed_cycles: u32,
    pub last_cycle_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_cycle() -> CycleReport {
        CycleReport {
            polled: 2,
            failed: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_claim_and_release() {
        let health = Arc::new(EngineHealth::new());
        assert_eq!(health.status(), EngineStatus::Idle);

        let claim = health.try_claim(Some(EngineStatus::Stopped)).unwrap();
        assert!(health.try_claim(None).is_none());
        assert!(health.is_running());

        drop(claim);
        assert_eq!(health.status(), EngineStatus::Stopped);
        assert!(health.try_claim(None).is_some());
    }

    #[test]
    fn test_claim_restores_previous_status() {
        let health = Arc::new(EngineHealth::new());

        let claim = health.try_claim(None).unwrap();
        assert_eq!(health.status(), EngineStatus::Running);
        drop(claim);
        assert_eq!(health.status(), EngineStatus::Idle);
    }

    #[test]
    fn test_claim_released_when_owner_panics() {
        let health = Arc::new(EngineHealth::new());
        let held = health.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _claim = held.try_claim(Some(EngineStatus::Stopped)).unwrap();
            panic!("engine task failed");
        }));
        assert!(result.is_err());
        assert_eq!(health.status(), EngineStatus::Stopped);
    }

    #[test]
    fn test_degraded_after_failed_cycle() {
        let health = Arc::new(EngineHealth::new());
        let _claim = health.try_claim(None).unwrap();

        health.record_cycle(&failed_cycle());
        health.record_cycle(&failed_cycle());
        let stats = health.stats();
        assert_eq!(stats.status, EngineStatus::Degraded);
        assert_eq!(stats.consecutive_failed_cycles, 2);
        assert_eq!(stats.poll_failures, 4);

        health.record_cycle(&CycleReport {
            polled: 2,
            received: 1,
            empty: 1,
            ..Default::default()
        });
        let stats = health.stats();
        assert_eq!(stats.status, EngineStatus::Running);
        assert_eq!(stats.consecutive_failed_cycles, 0);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.cycles, 3);
    }

    #[test]
    fn test_cycle_on_idle_engine_keeps_status() {
        let health = EngineHealth::new();
        health.record_cycle(&failed_cycle());
        assert_eq!(health.status(), EngineStatus::Idle);
        assert_eq!(health.stats().cycles, 1);
    }
}
