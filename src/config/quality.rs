//! Quality tracking configuration

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

/// Configuration for stage quality tracking.
///
/// Quality output is advisory: it flags stages whose outputs score poorly on
/// a tier but never changes routing.
///
/// # Example
///
/// ```toml
/// [quality]
/// trend_window = 5
/// underperforming_threshold = 0.7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Samples per window when comparing recent against prior quality.
    ///
    /// Default: 5
    pub trend_window: usize,

    /// Average quality below which a stage/tier is reported as underperforming.
    ///
    /// Default: 0.7
    /// Range: 0.0 to 1.0
    pub underperforming_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            trend_window: 5,
            underperforming_threshold: 0.7,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trend_window == 0 {
            return Err(ConfigError::invalid(
                "quality.trend_window",
                "window must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.underperforming_threshold) {
            return Err(ConfigError::invalid(
                "quality.underperforming_threshold",
                "threshold must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}
