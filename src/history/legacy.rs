//! Reader for the flat JSON history file used before the SQLite store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PersistenceError;
use crate::accounting::CostReport;
use crate::routing::Tier;
use crate::workflow::{StageOutcome, WorkflowRun};

/// Result of a legacy import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    /// Runs already present in the store
    pub skipped: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyFile {
    Runs(Vec<LegacyRun>),
    Wrapped { runs: Vec<LegacyRun> },
}

#[derive(Deserialize)]
struct LegacyRun {
    #[serde(alias = "id")]
    run_id: String,
    #[serde(alias = "workflow")]
    workflow_name: String,
    #[serde(default = "unknown_provider")]
    provider: String,
    success: bool,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    total_cost: f64,
    #[serde(default)]
    baseline_cost: f64,
    #[serde(default)]
    cache_savings: f64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stages: Vec<LegacyStage>,
}

#[derive(Deserialize)]
struct LegacyStage {
    #[serde(alias = "stage_name")]
    name: String,
    tier: String,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    skip_reason: Option<String>,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    quality_score: Option<f64>,
}

fn unknown_provider() -> String {
    "unknown".to_string()
}

pub(super) fn parse(bytes: &[u8]) -> Result<Vec<WorkflowRun>, PersistenceError> {
    let runs = match serde_json::from_slice::<LegacyFile>(bytes)? {
        LegacyFile::Runs(runs) | LegacyFile::Wrapped { runs } => runs,
    };
    runs.into_iter().map(convert).collect()
}

fn convert(legacy: LegacyRun) -> Result<WorkflowRun, PersistenceError> {
    let completed_at = legacy.completed_at.unwrap_or(legacy.started_at);
    if completed_at < legacy.started_at {
        return Err(PersistenceError::InvalidRecord(format!(
            "run {} completed before it started",
            legacy.run_id
        )));
    }

    let stages = legacy
        .stages
        .into_iter()
        .map(|s| {
            let tier: Tier = s.tier.parse().map_err(|e: String| {
                PersistenceError::InvalidRecord(format!("run {}: {}", legacy.run_id, e))
            })?;
            if s.skipped {
                return Ok(StageOutcome::skipped(
                    s.name,
                    tier,
                    s.skip_reason.unwrap_or_else(|| "skipped".to_string()),
                ));
            }
            Ok(StageOutcome {
                cost: s.cost,
                duration_ms: s.duration_ms,
                input_tokens: s.input_tokens,
                output_tokens: s.output_tokens,
                quality_score: s.quality_score.map(|q| q.clamp(0.0, 1.0)),
                ..StageOutcome::new(s.name, tier)
            })
        })
        .collect::<Result<Vec<_>, PersistenceError>>()?;

    let savings = (legacy.baseline_cost - legacy.total_cost).max(0.0);
    let cost = CostReport {
        total_cost: legacy.total_cost,
        baseline_cost: legacy.baseline_cost,
        savings,
        savings_percent: if legacy.baseline_cost > 0.0 {
            savings / legacy.baseline_cost
        } else {
            0.0
        },
        cache_savings: legacy.cache_savings,
        ..Default::default()
    };

    // The old format did not enforce success == (error is none).
    let error = match (legacy.success, legacy.error) {
        (true, _) => None,
        (false, Some(e)) => Some(e),
        (false, None) => Some("failed (imported without error detail)".to_string()),
    };

    Ok(WorkflowRun {
        run_id: legacy.run_id,
        workflow_name: legacy.workflow_name,
        provider: legacy.provider,
        success: error.is_none(),
        started_at: legacy.started_at,
        completed_at,
        duration_ms: legacy.duration_ms.unwrap_or_else(|| {
            (completed_at - legacy.started_at).num_milliseconds().max(0) as u64
        }),
        stages,
        cost,
        error,
        output: None,
    })
}
