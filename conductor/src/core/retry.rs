//! Retry budget and backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for failed dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Recoverable failures allowed before a task is marked `failed`.
    pub max_retries: u32,
    /// Delay before the first re-dispatch, in milliseconds. `0` disables backoff.
    pub base_delay_ms: u64,
    /// Backoff multiplier applied per additional retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 0,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "retry.multiplier must be a finite number >= 1.0 (got {})",
                self.multiplier
            ));
        }
        Ok(())
    }

    /// True if a task that has already retried `retry_count` times may retry again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before re-dispatching a task that has retried `retry_count` times.
    ///
    /// `base_delay * multiplier^(retry_count - 1)`; zero when `retry_count` is 0.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = retry_count.saturating_sub(1).min(16) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }
}
