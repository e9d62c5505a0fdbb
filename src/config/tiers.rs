//! Tier model and pricing configuration

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::routing::Tier;

/// Model and per-million-token prices for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Upstream model identifier used when the policy does not override it
    pub model: String,
    /// USD per 1M input tokens
    pub input_cost_per_million: f64,
    /// USD per 1M output tokens
    pub output_cost_per_million: f64,
}

impl TierConfig {
    pub fn new(model: &str, input_cost_per_million: f64, output_cost_per_million: f64) -> Self {
        Self {
            model: model.to_string(),
            input_cost_per_million,
            output_cost_per_million,
        }
    }
}

/// All three tiers.
///
/// # Example
///
/// ```toml
/// [tiers.cheap]
/// model = "claude-3-haiku"
/// input_cost_per_million = 0.25
/// output_cost_per_million = 1.25
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub cheap: TierConfig,
    pub capable: TierConfig,
    pub premium: TierConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            cheap: TierConfig::new("claude-3-haiku", 0.25, 1.25),
            capable: TierConfig::new("claude-3.5-sonnet", 3.00, 15.00),
            premium: TierConfig::new("claude-3-opus", 15.00, 75.00),
        }
    }
}

impl TiersConfig {
    pub fn get(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Cheap => &self.cheap,
            Tier::Capable => &self.capable,
            Tier::Premium => &self.premium,
        }
    }

    /// Prices must be non-negative and no tier may cost more than premium.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let premium = self.get(Tier::MOST_EXPENSIVE);

        for tier in Tier::ALL {
            let cfg = self.get(tier);
            let field = format!("tiers.{}", tier);

            if cfg.model.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("{}.model", field),
                    "model cannot be empty",
                ));
            }
            for (name, price) in [
                ("input_cost_per_million", cfg.input_cost_per_million),
                ("output_cost_per_million", cfg.output_cost_per_million),
            ] {
                if !price.is_finite() || price < 0.0 {
                    return Err(ConfigError::invalid(
                        format!("{}.{}", field, name),
                        "price must be a non-negative number",
                    ));
                }
            }
            if cfg.input_cost_per_million > premium.input_cost_per_million
                || cfg.output_cost_per_million > premium.output_cost_per_million
            {
                return Err(ConfigError::invalid(
                    field,
                    "tier is priced above the premium tier",
                ));
            }
        }

        Ok(())
    }
}
