//! Durable run history.
//!
//! Every completed run (successful or not) is written exactly once, as a
//! single transaction covering the run row and all of its stage rows.
//! Readers therefore never observe a run without its stages or stages
//! without their run.
//!
//! The query surface ([`HistoryStore::query_runs`], [`HistoryStore::get_stats`],
//! [`HistoryStore::quality_samples`]) is what the CLI and any dashboard rely
//! on; the shapes returned here stay stable across storage changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
mod legacy;
pub mod schema;
pub mod sqlite;

pub use error::PersistenceError;
pub use legacy::ImportSummary;
pub use sqlite::SqliteHistoryStore;

use crate::quality::QualitySample;
use crate::routing::Tier;
use crate::workflow::{StageOutcome, WorkflowRun};

/// Conjunctive query filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub workflow_name: Option<String>,
    pub provider: Option<String>,
    /// Runs started at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub success_only: bool,
}

impl RunFilter {
    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn success_only(mut self) -> Self {
        self.success_only = true;
        self
    }
}

/// A persisted run as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_name: String,
    pub provider: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_cost: f64,
    pub baseline_cost: f64,
    pub savings: f64,
    pub savings_percent: f64,
    pub cache_savings: f64,
    pub cache_hits: u32,
    pub accounting_anomaly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stages: Vec<StageOutcome>,
}

/// Aggregates for one workflow or provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: String,
    pub runs: u64,
    pub successes: u64,
    pub total_cost: f64,
    pub total_savings: f64,
    pub avg_duration_ms: f64,
}

impl GroupStats {
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }
}

/// Aggregates over executed (non-skipped) stages of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: Tier,
    pub stages: u64,
    pub total_cost: f64,
    pub cache_hits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_quality: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub total_cost: f64,
    pub total_savings: f64,
    pub total_cache_savings: f64,
    pub by_workflow: Vec<GroupStats>,
    pub by_provider: Vec<GroupStats>,
    pub by_tier: Vec<TierStats>,
    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Durable, internally synchronized run history.
///
/// Callers never need external locking; concurrent `record_run` calls from
/// any number of tasks or processes are safe.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a terminal run and all of its stages atomically.
    async fn record_run(&self, run: &WorkflowRun) -> Result<(), PersistenceError>;

    /// Runs matching `filter`, newest first, at most `limit`.
    async fn query_runs(
        &self,
        filter: &RunFilter,
        limit: usize,
    ) -> Result<Vec<RunRecord>, PersistenceError>;

    async fn get_stats(&self) -> Result<AggregateStats, PersistenceError>;

    /// Quality scores of executed stages from runs completed at or after `since`.
    async fn quality_samples(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<QualitySample>, PersistenceError>;
}
