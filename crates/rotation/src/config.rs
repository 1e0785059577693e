//! Scheduler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RotationError, RotationResult};

/// Default ticker period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Tuning knobs of the rotation scheduler
///
/// Durations are written in humantime form (`"5s"`, `"10m"`) when loaded
/// from a settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Period of the background ticker
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Maximum rotations executed concurrently within one drain
    pub workers: usize,

    /// Delay before the first retry of a failed rotation
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Upper bound of the exponential retry delay
    #[serde(with = "humantime_serde")]
    pub max_retry_backoff: Duration,

    /// How long a rotation waits for its key lock before giving up
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Deadline of a single identity-service call sequence
    #[serde(with = "humantime_serde")]
    pub remote_timeout: Duration,

    /// Number of entries in the key lock table
    pub lock_table_size: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            workers: 4,
            retry_backoff: Duration::from_secs(10),
            max_retry_backoff: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(30),
            lock_table_size: 256,
        }
    }
}

impl RotationConfig {
    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> RotationResult<()> {
        if self.tick_interval.is_zero() {
            return Err(RotationError::Config("tick_interval must be positive".into()));
        }
        if self.workers == 0 {
            return Err(RotationError::Config("workers must be at least 1".into()));
        }
        if self.retry_backoff.is_zero() {
            return Err(RotationError::Config("retry_backoff must be positive".into()));
        }
        if self.max_retry_backoff < self.retry_backoff {
            return Err(RotationError::Config(
                "max_retry_backoff must not be shorter than retry_backoff".into(),
            ));
        }
        if self.lock_timeout.is_zero() || self.remote_timeout.is_zero() {
            return Err(RotationError::Config("timeouts must be positive".into()));
        }
        if self.lock_table_size == 0 {
            return Err(RotationError::Config("lock_table_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Delay before retrying after `failures` consecutive failed attempts
    ///
    /// Doubles from `retry_backoff` up to `max_retry_backoff`. When the key
    /// rotates periodically the delay always stays strictly inside the
    /// rotation interval.
    pub fn retry_delay(&self, failures: u32, interval: Option<Duration>) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .retry_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_retry_backoff);

        let delay = match interval {
            Some(interval) if delay >= interval => interval / 2,
            _ => delay,
        };
        delay.max(Duration::from_millis(1))
    }
}
