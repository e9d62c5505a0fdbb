//! Bounded retry with exponential backoff.

use std::time::Duration;

use crate::config::ExecutorConfig;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.backoff_ms))
    }

    /// Total attempts at one tier. A tier the policy may not fall back from
    /// gets exactly one attempt.
    pub fn attempts(&self, can_fallback: bool) -> u32 {
        if can_fallback {
            self.max_retries + 1
        } else {
            1
        }
    }

    /// Sleep before retry number `retry` (0-based): base, 2x base, 4x base...
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}
