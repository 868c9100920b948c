use super::backoff::LinearBackoff;
use serde::Deserialize;
use std::time::Duration;

/// Conflict retry configuration for [`TxExecutor`](crate::executor::TxExecutor).
///
/// Deserializes from `{ "max_retries": 3, "min_retry_interval_ms": 50 }`;
/// missing fields fall back to [`RetryPolicy::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt. `0` disables retrying.
    pub max_retries: u32,

    /// Backoff unit; retry `n` waits `n × min_retry_interval`.
    #[serde(rename = "min_retry_interval_ms", with = "duration_ms")]
    pub min_retry_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, min_retry_interval: Duration) -> Self {
        Self {
            max_retries,
            min_retry_interval,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Set the maximum number of retries
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the minimum retry interval
    pub fn min_retry_interval(mut self, interval: Duration) -> Self {
        self.min_retry_interval = interval;
        self
    }

    /// The linear backoff this policy describes.
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.min_retry_interval)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 0 && self.min_retry_interval.is_zero() {
            return Err("min_retry_interval must be > 0 when retries are enabled".to_string());
        }

        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
