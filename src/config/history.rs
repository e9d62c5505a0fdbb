//! Run history store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::error::ConfigError;

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Number of recent runs included in aggregate stats
    pub recent_runs: usize,
    /// How long a writer waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tierflow_history.sqlite"),
            recent_runs: 10,
            busy_timeout_ms: 5_000,
        }
    }
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("history.path", "path cannot be empty"));
        }
        Ok(())
    }
}
