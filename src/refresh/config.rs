//! Limits and backoff for background refreshes.

use std::time::Duration;

use crate::{Result, VerdandiError};

/// Configuration for the [`BackgroundRefreshManager`](super::BackgroundRefreshManager).
///
/// Three independent limits apply at once: `max_concurrent` bounds global
/// work, `max_retry_attempts` bounds each task's retries, and
/// `max_refresh_duration` bounds each task's total lifetime regardless of
/// how many retries remain.
///
/// ```rust
/// # use verdandi::RefreshConfig;
/// # use std::time::Duration;
/// let config = RefreshConfig::new()
///     .max_concurrent(2)
///     .base_retry_delay(Duration::from_millis(200))
///     .max_queue_size(10);
/// assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Tasks executing at once. Default: 3.
    pub max_concurrent: usize,
    /// Retries after the first attempt (0 = no retry). Default: 3.
    pub max_retry_attempts: u32,
    /// Delay before the first retry. Default: 1s.
    pub base_retry_delay: Duration,
    /// Cap on the exponential delay. Default: 30s.
    pub max_retry_delay: Duration,
    /// Wall-clock deadline per task, measured from its first attempt.
    /// Default: 2 minutes.
    pub max_refresh_duration: Duration,
    /// Tasks waiting for a slot; the oldest is dropped when full. Default: 50.
    pub max_queue_size: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            max_refresh_duration: Duration::from_secs(120),
            max_queue_size: 50,
        }
    }
}

impl RefreshConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn max_retry_attempts(mut self, n: u32) -> Self {
        self.max_retry_attempts = n;
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn max_refresh_duration(mut self, duration: Duration) -> Self {
        self.max_refresh_duration = duration;
        self
    }

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    /// Delay slept before `attempt` (0-indexed; the first attempt has none).
    ///
    /// `base_retry_delay * 2^(attempt - 1)`, capped at `max_retry_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self
            .base_retry_delay
            .saturating_mul(2u32.saturating_pow(attempt - 1));
        delay.min(self.max_retry_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(VerdandiError::Configuration(
                "refresh max_concurrent must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let config = RefreshConfig::new()
            .base_retry_delay(Duration::from_millis(100))
            .max_retry_delay(Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RefreshConfig::new()
            .base_retry_delay(Duration::from_secs(1))
            .max_retry_delay(Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn zero_concurrency_rejected() {
        assert!(RefreshConfig::new().max_concurrent(0).validate().is_err());
    }
}
