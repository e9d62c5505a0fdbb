//! Routing strategies for tier selection

use super::{Complexity, LatencySensitivity, RoutingContext, RoutingDecision, RoutingPolicy, Tier};
use crate::config::RoutingConfig;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Remaining-budget ratio below which [`BudgetAware`] forces the cheapest tier.
pub const LOW_BUDGET_RATIO: f64 = 0.2;

/// Remaining-budget ratio above which [`BudgetAware`] allows the premium tier.
pub const HIGH_BUDGET_RATIO: f64 = 0.7;

/// Which routing policy to construct from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Cheapest tier that fits the task complexity
    #[default]
    CostOptimized,

    /// Fastest tier for latency-sensitive work
    PerformanceOptimized,

    /// Complexity routing bounded by the remaining run budget
    BudgetAware,

    /// Complexity routing with operator-supplied model identifiers per tier
    Explicit,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cost_optimized" => Ok(PolicyKind::CostOptimized),
            "performance_optimized" => Ok(PolicyKind::PerformanceOptimized),
            "budget_aware" => Ok(PolicyKind::BudgetAware),
            "explicit" => Ok(PolicyKind::Explicit),
            _ => Err(format!("Unknown routing policy: {}", s)),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::CostOptimized => write!(f, "cost_optimized"),
            PolicyKind::PerformanceOptimized => write!(f, "performance_optimized"),
            PolicyKind::BudgetAware => write!(f, "budget_aware"),
            PolicyKind::Explicit => write!(f, "explicit"),
        }
    }
}

/// Build the configured routing policy.
pub fn build_policy(config: &RoutingConfig) -> Box<dyn RoutingPolicy> {
    match config.policy {
        PolicyKind::CostOptimized => Box::new(CostOptimized),
        PolicyKind::PerformanceOptimized => Box::new(PerformanceOptimized),
        PolicyKind::BudgetAware => Box::new(BudgetAware::new(config.total_budget)),
        PolicyKind::Explicit => Box::new(ExplicitMapping::new(config.models.clone())),
    }
}

fn tier_for_complexity(complexity: Complexity) -> Tier {
    match complexity {
        Complexity::Simple => Tier::CHEAPEST,
        Complexity::Moderate => Tier::Capable,
        Complexity::Complex => Tier::MOST_EXPENSIVE,
    }
}

/// Default policy: route by complexity, fall back unless already cheapest.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostOptimized;

impl RoutingPolicy for CostOptimized {
    fn name(&self) -> &'static str {
        "cost_optimized"
    }

    fn decide(&self, context: &RoutingContext) -> RoutingDecision {
        let tier = tier_for_complexity(context.effective_complexity());
        RoutingDecision::new(tier, tier != Tier::CHEAPEST)
    }
}

/// Latency first. Once a tier is chosen it is never traded down.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceOptimized;

impl RoutingPolicy for PerformanceOptimized {
    fn name(&self) -> &'static str {
        "performance_optimized"
    }

    fn decide(&self, context: &RoutingContext) -> RoutingDecision {
        let tier = match context.latency {
            LatencySensitivity::High => Tier::MOST_EXPENSIVE,
            LatencySensitivity::Low | LatencySensitivity::Normal => Tier::Capable,
        };
        RoutingDecision::new(tier, false)
    }
}

/// Complexity routing clamped by how much of the run budget is left.
///
/// The ratio is taken against the run's own budget when the context carries
/// one, and against the configured `total_budget` otherwise.
#[derive(Debug, Clone, Copy)]
pub struct BudgetAware {
    total_budget: f64,
}

impl BudgetAware {
    pub fn new(total_budget: f64) -> Self {
        Self { total_budget }
    }

    /// Fraction of the budget still available, if it can be computed.
    fn remaining_ratio(&self, context: &RoutingContext) -> Option<f64> {
        let remaining = context.remaining_budget?;
        let total = context.total_budget.unwrap_or(self.total_budget);
        if !(total.is_finite() && total > 0.0) || !remaining.is_finite() {
            return None;
        }
        Some((remaining / total).clamp(0.0, 1.0))
    }
}

impl RoutingPolicy for BudgetAware {
    fn name(&self) -> &'static str {
        "budget_aware"
    }

    fn decide(&self, context: &RoutingContext) -> RoutingDecision {
        let tier = match self.remaining_ratio(context) {
            Some(ratio) if ratio < LOW_BUDGET_RATIO => Tier::CHEAPEST,
            Some(ratio)
                if ratio > HIGH_BUDGET_RATIO
                    && context.effective_complexity() == Complexity::Complex =>
            {
                Tier::MOST_EXPENSIVE
            }
            _ => Tier::Capable,
        };
        RoutingDecision::new(tier, true)
    }
}

/// Operator-supplied tier → model identifiers, first entry wins.
pub struct ExplicitMapping {
    inner: Box<dyn RoutingPolicy>,
    models: BTreeMap<Tier, Vec<String>>,
}

impl ExplicitMapping {
    /// Complexity-driven routing ([`CostOptimized`]) with overridden models.
    pub fn new(models: BTreeMap<Tier, Vec<String>>) -> Self {
        Self::with_inner(Box::new(CostOptimized), models)
    }

    pub fn with_inner(inner: Box<dyn RoutingPolicy>, models: BTreeMap<Tier, Vec<String>>) -> Self {
        Self { inner, models }
    }
}

impl RoutingPolicy for ExplicitMapping {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn decide(&self, context: &RoutingContext) -> RoutingDecision {
        let mut decision = self.inner.decide(context);
        decision.model = self.model_for(decision.tier);
        decision
    }

    fn model_for(&self, tier: Tier) -> Option<String> {
        self.models
            .get(&tier)
            .and_then(|candidates| candidates.first())
            .cloned()
    }
}
