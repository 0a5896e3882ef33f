//! Exponential backoff used to pace the dispatch loop while the store is failing

use std::time::Duration;

use rand::Rng;

use crate::config::DispatchConfig;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied after every failed attempt
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&DispatchConfig> for BackoffConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.backoff_initial_delay_ms),
            max_delay: Duration::from_millis(config.backoff_max_delay_ms),
            ..Default::default()
        }
    }
}

/// Delay calculator: the first delay equals `initial_delay`, each later one grows
/// by `multiplier` up to `max_delay`, with symmetric jitter on top.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32) as i32;
        self.attempt = self.attempt.saturating_add(1);

        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let base = (initial_ms * self.config.multiplier.powi(exponent)).min(max_ms);

        let jitter_range = base * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter_range >= 1.0 {
            base + rand::rng().random_range(-jitter_range..jitter_range)
        } else {
            base
        };

        Duration::from_millis(delay.clamp(1.0, max_ms.max(1.0)) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
