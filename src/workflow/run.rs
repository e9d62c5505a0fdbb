//! Run and stage records produced by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounting::CostReport;
use crate::routing::Tier;

/// Record of one stage's execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub name: String,
    pub tier: Tier,
    /// Model the tier resolved to; absent for skipped stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Actual spend in USD; zero for skips and cache hits
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    /// 0.0..=1.0, absent when the stage was not scored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub cache_hit: bool,
    /// Original cost of the cached response served instead of a fresh call
    #[serde(default)]
    pub cache_savings: f64,
    /// Tier originally routed to when the stage fell back to a cheaper one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fell_back_from: Option<Tier>,
}

impl StageOutcome {
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            tier,
            model: None,
            skipped: false,
            skip_reason: None,
            cost: 0.0,
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            quality_score: None,
            cache_hit: false,
            cache_savings: 0.0,
            fell_back_from: None,
        }
    }

    /// A stage that bypassed execution: zero cost, zero tokens, no score.
    pub fn skipped(name: impl Into<String>, tier: Tier, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::new(name, tier)
        }
    }
}

/// One execution of a named workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_name: String,
    pub provider: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// In stage-definition order
    pub stages: Vec<StageOutcome>,
    pub cost: CostReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output of the last executed stage; not persisted
    #[serde(skip)]
    pub output: Option<String>,
}

impl WorkflowRun {
    /// Start a new run with a fresh identifier.
    pub fn start(workflow_name: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            provider: provider.into(),
            success: false,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            stages: Vec::new(),
            cost: CostReport::default(),
            error: None,
            output: None,
        }
    }

    /// Mark the run terminal. `error` decides the success flag.
    pub fn complete(&mut self, cost: CostReport, error: Option<String>) {
        let now = Utc::now();
        self.completed_at = now.max(self.started_at);
        self.duration_ms = (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.cost = cost;
        self.success = error.is_none();
        self.error = error;
    }

    /// Record a failure discovered after completion (e.g. persistence).
    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }

    pub fn executed_stages(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|s| !s.skipped)
    }
}
