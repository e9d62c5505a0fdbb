//! `tierflow quality` - stage quality from persisted scores

use serde::Serialize;
use std::error::Error;

use crate::cli::output::{format_quality_table, percent};
use crate::cli::{load_config, parse_since, QualityArgs};
use crate::config::QualityConfig;
use crate::history::{HistoryStore, SqliteHistoryStore};
use crate::quality::{QualityTracker, StageQualityStats};

#[derive(Debug, Serialize)]
struct QualityReport {
    threshold: f64,
    stages: Vec<StageQualityStats>,
    underperforming: Vec<StageQualityStats>,
}

/// Rebuild the tracker from `store` and render stats plus underperformers.
pub async fn quality_report(
    store: &dyn HistoryStore,
    config: &QualityConfig,
    args: &QualityArgs,
) -> Result<String, Box<dyn Error>> {
    let threshold = args.threshold.unwrap_or(config.underperforming_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("Threshold must be between 0.0 and 1.0, got {}", threshold).into());
    }

    let since = parse_since(args.since.as_deref())?;
    let samples = store.quality_samples(since).await?;
    let tracker = QualityTracker::from_samples(config.trend_window, samples);

    let report = QualityReport {
        threshold,
        stages: tracker.get_stage_stats(),
        underperforming: tracker.get_underperforming(threshold),
    };

    if args.json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    if report.stages.is_empty() {
        return Ok("No quality samples recorded yet.".to_string());
    }

    let mut out = format!("{}\n", format_quality_table(&report.stages, threshold));
    if report.underperforming.is_empty() {
        out.push_str(&format!("No stages below {:.2}.", threshold));
    } else {
        out.push_str(&format!("Underperforming (below {:.2}):\n", threshold));
        for s in &report.underperforming {
            out.push_str(&format!(
                "  {}/{} on {}: avg {:.2} over {} samples ({})\n",
                s.workflow,
                s.stage,
                s.tier,
                s.avg_quality,
                s.samples,
                percent(s.avg_quality)
            ));
        }
    }
    Ok(out)
}

/// Handle `tierflow quality`
pub async fn handle_quality(args: &QualityArgs) -> Result<String, Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let store = SqliteHistoryStore::from_config(&config.history)?;
    quality_report(&store, &config.quality, args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::CostReport;
    use crate::routing::Tier;
    use crate::workflow::{StageOutcome, WorkflowRun};
    use std::path::PathBuf;

    fn args(threshold: Option<f64>, json: bool) -> QualityArgs {
        QualityArgs {
            threshold,
            since: None,
            json,
            config: PathBuf::from("tierflow.toml"),
        }
    }

    async fn store_with_triage_scores() -> SqliteHistoryStore {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        for i in 0..10 {
            let mut run = WorkflowRun::start("audit", "openai");
            run.stages.push(StageOutcome {
                quality_score: Some(if i % 2 == 0 { 0.4 } else { 0.6 }),
                ..StageOutcome::new("triage", Tier::Cheap)
            });
            run.stages.push(StageOutcome {
                quality_score: Some(0.95),
                ..StageOutcome::new("report", Tier::Premium)
            });
            run.complete(CostReport::default(), None);
            store.record_run(&run).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_quality_report_flags_triage() {
        let store = store_with_triage_scores().await;
        let output = quality_report(&store, &QualityConfig::default(), &args(Some(0.7), true))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["stages"].as_array().unwrap().len(), 2);
        let flagged = parsed["underperforming"].as_array().unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0]["stage"], "triage");
    }

    #[tokio::test]
    async fn test_quality_report_uses_config_threshold() {
        let store = store_with_triage_scores().await;
        let config = QualityConfig {
            underperforming_threshold: 0.3,
            ..Default::default()
        };
        let output = quality_report(&store, &config, &args(None, false))
            .await
            .unwrap();
        assert!(output.contains("No stages below 0.30."));
    }

    #[tokio::test]
    async fn test_quality_report_rejects_bad_threshold() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let result = quality_report(&store, &QualityConfig::default(), &args(Some(1.5), false)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_quality_report_empty() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let output = quality_report(&store, &QualityConfig::default(), &args(None, false))
            .await
            .unwrap();
        assert_eq!(output, "No quality samples recorded yet.");
    }
}
