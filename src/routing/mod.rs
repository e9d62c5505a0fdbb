//! Tier routing for workflow stages
//!
//! This module owns the [`Tier`] enumeration shared by every other module and
//! the [`RoutingPolicy`] abstraction that maps a stage's needs onto a tier.
//! Policies are pure: they look at a [`RoutingContext`] and their own
//! configuration, never at shared state.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod error;
pub mod strategies;

pub use error::RoutingError;
pub use strategies::{
    build_policy, BudgetAware, CostOptimized, ExplicitMapping, PerformanceOptimized, PolicyKind,
};

/// Capability/cost class of the inference service, ordered cheapest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cheap,
    #[default]
    Capable,
    Premium,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::Cheap, Tier::Capable, Tier::Premium];

    pub const CHEAPEST: Tier = Tier::Cheap;
    pub const MOST_EXPENSIVE: Tier = Tier::Premium;

    /// The next strictly cheaper tier, if any.
    pub fn cheaper(self) -> Option<Tier> {
        match self {
            Tier::Cheap => None,
            Tier::Capable => Some(Tier::Cheap),
            Tier::Premium => Some(Tier::Capable),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Cheap => "cheap",
            Tier::Capable => "capable",
            Tier::Premium => "premium",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cheap" => Ok(Tier::Cheap),
            "capable" => Ok(Tier::Capable),
            "premium" => Ok(Tier::Premium),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse complexity classification of a stage's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Complexity::Simple),
            "moderate" => Ok(Complexity::Moderate),
            "complex" => Ok(Complexity::Complex),
            _ => Err(format!("Unknown complexity: {}", s)),
        }
    }
}

/// How much a stage cares about response latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatencySensitivity {
    Low,
    #[default]
    Normal,
    High,
}

/// Routing need of one pending stage. Built fresh per stage invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingContext {
    pub task_type: String,
    pub estimated_input_tokens: u32,
    /// `None` means the stage did not classify itself.
    pub complexity: Option<Complexity>,
    /// Remaining run budget in USD, if the run has one.
    pub remaining_budget: Option<f64>,
    /// The run's full budget in USD; `remaining_budget` is a share of it.
    pub total_budget: Option<f64>,
    pub latency: LatencySensitivity,
}

impl RoutingContext {
    pub fn new(task_type: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            task_type: task_type.into(),
            complexity: Some(complexity),
            ..Default::default()
        }
    }

    pub fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_input_tokens = tokens;
        self
    }

    pub fn with_remaining_budget(mut self, remaining: f64) -> Self {
        self.remaining_budget = Some(remaining);
        self
    }

    pub fn with_total_budget(mut self, total: f64) -> Self {
        self.total_budget = Some(total);
        self
    }

    pub fn with_latency(mut self, latency: LatencySensitivity) -> Self {
        self.latency = latency;
        self
    }

    /// Complexity to route on; unclassified stages take the moderate path.
    pub fn effective_complexity(&self) -> Complexity {
        self.complexity.unwrap_or(Complexity::Moderate)
    }

    /// Repair a malformed context so routing can always proceed.
    ///
    /// Returns the repaired context and the first problem found, if any.
    pub fn sanitize(mut self) -> (Self, Option<RoutingError>) {
        let mut problem = None;

        if let Some(remaining) = self.remaining_budget {
            if !remaining.is_finite() {
                self.remaining_budget = None;
                problem = Some(RoutingError::InvalidBudget { remaining });
            } else if remaining < 0.0 {
                self.remaining_budget = Some(0.0);
                problem = Some(RoutingError::InvalidBudget { remaining });
            }
        }

        if let Some(total) = self.total_budget {
            if !(total.is_finite() && total > 0.0) {
                self.total_budget = None;
                problem.get_or_insert(RoutingError::InvalidTotalBudget { total });
            }
        }

        if self.complexity.is_none() {
            self.complexity = Some(Complexity::Moderate);
            problem.get_or_insert(RoutingError::MissingComplexity {
                task_type: self.task_type.clone(),
            });
        }

        (self, problem)
    }
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub tier: Tier,
    /// Whether a failing call at `tier` may be retried and re-routed cheaper.
    pub can_fallback: bool,
    /// Concrete upstream model, when the policy overrides tier resolution.
    pub model: Option<String>,
}

impl RoutingDecision {
    pub fn new(tier: Tier, can_fallback: bool) -> Self {
        Self {
            tier,
            can_fallback,
            model: None,
        }
    }
}

/// Pure tier-selection strategy.
pub trait RoutingPolicy: Send + Sync {
    /// Short name used in logs and config.
    fn name(&self) -> &'static str;

    /// Pick a tier for the stage described by `context`.
    fn decide(&self, context: &RoutingContext) -> RoutingDecision;

    /// Concrete model to use when falling back to `tier`.
    ///
    /// Only policies that override tier resolution return `Some`.
    fn model_for(&self, _tier: Tier) -> Option<String> {
        None
    }
}
