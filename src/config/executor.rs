//! Stage executor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::error::ConfigError;

/// Stage execution limits and retry behavior.
///
/// # Example
///
/// ```toml
/// [executor]
/// timeout_secs = 30
/// max_retries = 2
/// backoff_ms = 250
/// score_cache_hits = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on a single upstream call
    pub timeout_secs: u64,
    /// Retries per tier after the first attempt (fallback-eligible tiers only)
    pub max_retries: u32,
    /// Initial retry delay, doubled on each retry
    pub backoff_ms: u64,
    /// Run the quality scorer on cached outputs too
    pub score_cache_hits: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 2,
            backoff_ms: 250,
            score_cache_hits: false,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "executor.timeout_secs",
                "timeout must be non-zero",
            ));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::invalid(
                "executor.max_retries",
                "at most 10 retries are allowed",
            ));
        }
        Ok(())
    }
}
