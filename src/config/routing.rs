//! Routing configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::error::ConfigError;
use crate::routing::{PolicyKind, Tier};

/// Routing configuration
///
/// # Example
///
/// ```toml
/// [routing]
/// policy = "explicit"
///
/// [routing.models]
/// cheap = ["gpt-4o-mini", "claude-3-haiku"]
/// premium = ["gpt-4o"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Which routing policy to use
    #[serde(alias = "strategy")]
    pub policy: PolicyKind,

    /// Total budget in USD for the budget-aware policy
    pub total_budget: f64,

    /// Explicit tier → model identifiers (declared order is the tie-break)
    #[serde(default)]
    pub models: BTreeMap<Tier, Vec<String>>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::CostOptimized,
            total_budget: 1.0,
            models: BTreeMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy == PolicyKind::BudgetAware
            && !(self.total_budget.is_finite() && self.total_budget > 0.0)
        {
            return Err(ConfigError::Validation {
                field: "routing.total_budget".to_string(),
                message: "budget-aware routing needs a positive total_budget".to_string(),
            });
        }

        for (tier, models) in &self.models {
            if models.iter().any(|m| m.trim().is_empty()) {
                return Err(ConfigError::Validation {
                    field: format!("routing.models.{}", tier),
                    message: "model identifiers cannot be empty".to_string(),
                });
            }
        }

        if self.policy == PolicyKind::Explicit && self.models.is_empty() {
            return Err(ConfigError::Validation {
                field: "routing.models".to_string(),
                message: "explicit routing needs at least one tier mapping".to_string(),
            });
        }

        Ok(())
    }
}
