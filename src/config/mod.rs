//! Configuration module for Tierflow
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`TIERFLOW_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use tierflow::config::TierflowConfig;
//!
//! let toml = r#"
//! [executor]
//! timeout_secs = 30
//! "#;
//! let config: TierflowConfig = toml::from_str(toml).unwrap();
//! assert_eq!(config.executor.timeout_secs, 30);
//! assert_eq!(config.executor.max_retries, 2);
//! ```

pub mod cache;
pub mod error;
pub mod executor;
pub mod history;
pub mod logging;
pub mod quality;
pub mod routing;
pub mod tiers;
pub mod upstream;

pub use cache::{CacheBackendKind, CacheConfig};
pub use error::ConfigError;
pub use executor::ExecutorConfig;
pub use history::HistoryConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use quality::QualityConfig;
pub use routing::RoutingConfig;
pub use tiers::{TierConfig, TiersConfig};
pub use upstream::UpstreamConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Annotated example configuration, written by `tierflow config init`.
pub const EXAMPLE_CONFIG: &str = include_str!("../../tierflow.example.toml");

/// Unified configuration for the engine and CLI.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TierflowConfig {
    /// Tier models and prices
    pub tiers: TiersConfig,
    /// Routing policy selection
    pub routing: RoutingConfig,
    /// Fingerprint cache
    pub cache: CacheConfig,
    /// Durable run history
    pub history: HistoryConfig,
    /// Stage execution limits
    pub executor: ExecutorConfig,
    /// Quality tracking
    pub quality: QualityConfig,
    /// Inference endpoint
    pub upstream: UpstreamConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl TierflowConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supports TIERFLOW_* environment variables for common settings.
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("TIERFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIERFLOW_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }
        if let Ok(path) = std::env::var("TIERFLOW_HISTORY_PATH") {
            self.history.path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("TIERFLOW_CACHE_PATH") {
            self.cache.path = PathBuf::from(path);
        }
        if let Ok(policy) = std::env::var("TIERFLOW_ROUTING_POLICY") {
            if let Ok(p) = policy.parse() {
                self.routing.policy = p;
            }
        }
        if let Ok(url) = std::env::var("TIERFLOW_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(timeout) = std::env::var("TIERFLOW_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                self.executor.timeout_secs = t;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers.validate()?;
        self.routing.validate()?;
        self.cache.validate()?;
        self.history.validate()?;
        self.executor.validate()?;
        self.quality.validate()?;
        self.upstream.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{PolicyKind, Tier};
    use std::path::Path;

    #[test]
    fn test_tierflow_config_defaults() {
        let config = TierflowConfig::default();
        assert_eq!(config.routing.policy, PolicyKind::CostOptimized);
        assert!(config.cache.enabled);
        assert_eq!(config.executor.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_minimal_toml() {
        let toml = r#"
        [history]
        path = "runs.sqlite"
        "#;

        let config: TierflowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.history.path, PathBuf::from("runs.sqlite"));
        assert_eq!(config.history.recent_runs, 10); // Default
    }

    #[test]
    fn test_config_parse_example_toml() {
        let config: TierflowConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.tiers.get(Tier::Premium).model.is_empty());
    }

    #[test]
    fn test_config_load_from_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "[executor]\ntimeout_secs = 5").unwrap();

        let config = TierflowConfig::load(Some(temp.path())).unwrap();
        assert_eq!(config.executor.timeout_secs, 5);
    }

    #[test]
    fn test_config_missing_file_error() {
        let result = TierflowConfig::load(Some(Path::new("/nonexistent/tierflow.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_config_parse_error() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "[executor\ntimeout_secs = ").unwrap();

        let result = TierflowConfig::load(Some(temp.path()));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_env_overrides() {
        std::env::set_var("TIERFLOW_ROUTING_POLICY", "performance_optimized");
        std::env::set_var("TIERFLOW_TIMEOUT_SECS", "not-a-number");
        let config = TierflowConfig::default().with_env_overrides();
        std::env::remove_var("TIERFLOW_ROUTING_POLICY");
        std::env::remove_var("TIERFLOW_TIMEOUT_SECS");

        assert_eq!(config.routing.policy, PolicyKind::PerformanceOptimized);
        // Invalid value keeps default, not crash
        assert_eq!(config.executor.timeout_secs, 60);
    }

    #[test]
    fn test_config_validation_reports_section() {
        let mut config = TierflowConfig::default();
        config.quality.trend_window = 0;

        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::Validation { ref field, .. }) if field == "quality.trend_window"
        ));
    }

    #[test]
    fn test_config_load_none_returns_defaults() {
        let config = TierflowConfig::load(None).unwrap();
        assert_eq!(config.upstream.provider, "openai");
    }
}
