//! Per-run cost accounting.
//!
//! The [`CostAccountant`] accumulates stage costs as a run progresses and
//! compares them against an always-premium baseline computed from the same
//! token counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod pricing;

pub use pricing::{PriceTable, TierPricing};

use crate::routing::Tier;
use crate::workflow::StageOutcome;

/// Aggregate cost figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    /// Actual spend (USD); cache hits and skips contribute zero
    pub total_cost: f64,
    /// Spend had every stage run at the most expensive tier
    pub baseline_cost: f64,
    /// `baseline_cost - total_cost`, clamped at zero
    pub savings: f64,
    /// `savings / baseline_cost` as a fraction, 0 when there is no baseline
    pub savings_percent: f64,
    pub by_tier: BTreeMap<Tier, f64>,
    /// Spend avoided by serving stages from the cache
    pub cache_savings: f64,
    pub cache_hits: u32,
    /// Set when the price table produced negative savings
    #[serde(default)]
    pub accounting_anomaly: bool,
}

/// Builds a [`CostReport`] incrementally as stages complete.
#[derive(Debug, Clone)]
pub struct CostAccountant {
    prices: PriceTable,
    total_cost: f64,
    baseline_cost: f64,
    by_tier: BTreeMap<Tier, f64>,
    cache_savings: f64,
    cache_hits: u32,
}

impl CostAccountant {
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            total_cost: 0.0,
            baseline_cost: 0.0,
            by_tier: BTreeMap::new(),
            cache_savings: 0.0,
            cache_hits: 0,
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Add one stage's cost delta.
    pub fn record(&mut self, outcome: &StageOutcome) {
        if outcome.skipped {
            return;
        }

        self.baseline_cost += self
            .prices
            .baseline_cost(outcome.input_tokens, outcome.output_tokens);
        self.total_cost += outcome.cost;
        *self.by_tier.entry(outcome.tier).or_insert(0.0) += outcome.cost;

        if outcome.cache_hit {
            self.cache_hits += 1;
            self.cache_savings += outcome.cache_savings;
        }

        metrics::histogram!("tierflow_stage_cost_usd", "tier" => outcome.tier.as_str())
            .record(outcome.cost);
    }

    /// Spend so far in this run.
    pub fn total_spent(&self) -> f64 {
        self.total_cost
    }

    pub fn finalize(&self) -> CostReport {
        let mut savings = self.baseline_cost - self.total_cost;
        let mut accounting_anomaly = false;
        if savings < 0.0 {
            tracing::warn!(
                baseline_cost = self.baseline_cost,
                total_cost = self.total_cost,
                "Negative savings: a tier is priced above the most expensive tier, clamping to zero"
            );
            savings = 0.0;
            accounting_anomaly = true;
        }

        let savings_percent = if self.baseline_cost > 0.0 {
            savings / self.baseline_cost
        } else {
            0.0
        };

        CostReport {
            total_cost: self.total_cost,
            baseline_cost: self.baseline_cost,
            savings,
            savings_percent,
            by_tier: self.by_tier.clone(),
            cache_savings: self.cache_savings,
            cache_hits: self.cache_hits,
            accounting_anomaly,
        }
    }
}
