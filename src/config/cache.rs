//! Fingerprint cache configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::error::ConfigError;

/// Where cache entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Process-local LRU map
    #[default]
    Memory,
    /// SQLite file shared across processes
    Sqlite,
}

/// Cache configuration
///
/// # Example
///
/// ```toml
/// [cache]
/// backend = "sqlite"
/// path = ".tierflow_cache.sqlite"
/// max_entries = 50000
/// max_age_secs = 86400
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to always call upstream
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// SQLite file (sqlite backend only)
    pub path: PathBuf,
    /// Entries kept before least-recently-used eviction
    pub max_entries: usize,
    /// Entries older than this are never served. No limit when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            path: PathBuf::from(".tierflow_cache.sqlite"),
            max_entries: 10_000,
            max_age_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid(
                "cache.max_entries",
                "must be greater than zero",
            ));
        }
        if self.max_age_secs == Some(0) {
            return Err(ConfigError::invalid(
                "cache.max_age_secs",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}
