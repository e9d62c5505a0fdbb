//! Output formatting helpers for CLI commands

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;

use crate::history::{AggregateStats, GroupStats, RunRecord};
use crate::quality::{StageQualityStats, Trend};
use crate::workflow::{StageOutcome, WorkflowRun};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// Dollar amount with enough precision for per-stage costs.
pub fn usd(amount: f64) -> String {
    format!("${:.6}", amount)
}

/// Fraction in 0..=1 rendered as a percentage.
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn status_icon(success: bool) -> &'static str {
    if success {
        "✓"
    } else {
        "✗"
    }
}

fn status_cell(success: bool) -> String {
    if success {
        "ok".green().to_string()
    } else {
        "failed".red().to_string()
    }
}

fn stage_rows(table: &mut Table, stages: &[StageOutcome]) {
    for s in stages {
        if s.skipped {
            table.add_row(vec![
                Cell::new(&s.name),
                Cell::new(s.tier),
                Cell::new(
                    format!("skipped: {}", s.skip_reason.as_deref().unwrap_or("-")).dimmed(),
                ),
                Cell::new("-"),
                Cell::new(usd(0.0)),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ]);
            continue;
        }

        let tier = match s.fell_back_from {
            Some(from) => format!("{} (from {})", s.tier, from).yellow().to_string(),
            None => s.tier.to_string(),
        };
        let cache = if s.cache_hit {
            "hit".cyan().to_string()
        } else {
            "miss".to_string()
        };
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(tier),
            Cell::new(s.model.as_deref().unwrap_or("-")),
            Cell::new(cache),
            Cell::new(usd(s.cost)),
            Cell::new(format!("{}/{}", s.input_tokens, s.output_tokens)),
            Cell::new(
                s.quality_score
                    .map(|q| format!("{:.2}", q))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(format!("{}ms", s.duration_ms)),
        ]);
    }
}

/// Human-readable report for a finished run.
pub fn format_run_report(run: &WorkflowRun) -> String {
    let mut table = new_table(vec![
        "Stage", "Tier", "Model", "Cache", "Cost", "Tokens", "Quality", "Duration",
    ]);
    stage_rows(&mut table, &run.stages);

    let mut out = format!(
        "{} {} ({}) run {}\n{}\n",
        status_icon(run.success),
        run.workflow_name.bold(),
        run.provider,
        run.run_id,
        table
    );
    out.push_str(&format!(
        "Total: {}  Baseline: {}  Savings: {} ({})  Cache savings: {} ({} hits)  Duration: {}ms\n",
        usd(run.cost.total_cost),
        usd(run.cost.baseline_cost),
        usd(run.cost.savings),
        percent(run.cost.savings_percent),
        usd(run.cost.cache_savings),
        run.cost.cache_hits,
        run.duration_ms
    ));
    if run.cost.accounting_anomaly {
        out.push_str(&format!(
            "{}\n",
            "Warning: run cost exceeded the premium baseline".yellow()
        ));
    }
    if let Some(error) = &run.error {
        out.push_str(&format!("{} {}\n", "Error:".red(), error));
    }
    out
}

/// Format recorded runs as a table, newest first.
pub fn format_runs_table(runs: &[RunRecord]) -> String {
    let mut table = new_table(vec![
        "Run", "Workflow", "Provider", "Status", "Started", "Stages", "Cost", "Savings",
        "Duration",
    ]);

    for r in runs {
        let executed = r.stages.iter().filter(|s| !s.skipped).count();
        table.add_row(vec![
            Cell::new(r.run_id.chars().take(8).collect::<String>()),
            Cell::new(&r.workflow_name),
            Cell::new(&r.provider),
            Cell::new(status_cell(r.success)),
            Cell::new(r.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(format!("{}/{}", executed, r.stages.len())),
            Cell::new(usd(r.total_cost)),
            Cell::new(format!("{} ({})", usd(r.savings), percent(r.savings_percent))),
            Cell::new(format!("{}ms", r.duration_ms)),
        ]);
    }

    table.to_string()
}

fn group_table(title: &str, groups: &[GroupStats]) -> Table {
    let mut table = new_table(vec![
        title, "Runs", "Success", "Cost", "Savings", "Avg Duration",
    ]);
    for g in groups {
        table.add_row(vec![
            Cell::new(&g.key),
            Cell::new(g.runs),
            Cell::new(percent(g.success_rate())),
            Cell::new(usd(g.total_cost)),
            Cell::new(usd(g.total_savings)),
            Cell::new(format!("{:.0}ms", g.avg_duration_ms)),
        ]);
    }
    table
}

/// Format aggregate statistics as summary lines plus tables.
pub fn format_stats_table(stats: &AggregateStats) -> String {
    let mut out = format!(
        "Runs: {} ({} successful)  Total cost: {}  Savings: {}  Cache savings: {}\n",
        stats.total_runs,
        stats.successful_runs,
        usd(stats.total_cost),
        usd(stats.total_savings),
        usd(stats.total_cache_savings)
    );
    if stats.total_runs == 0 {
        out.push_str("No runs recorded yet.\n");
        return out;
    }

    out.push_str(&format!("{}\n", group_table("Workflow", &stats.by_workflow)));
    out.push_str(&format!("{}\n", group_table("Provider", &stats.by_provider)));

    let mut tiers = new_table(vec!["Tier", "Stages", "Cost", "Cache Hits", "Avg Quality"]);
    for t in &stats.by_tier {
        tiers.add_row(vec![
            Cell::new(t.tier),
            Cell::new(t.stages),
            Cell::new(usd(t.total_cost)),
            Cell::new(t.cache_hits),
            Cell::new(
                t.avg_quality
                    .map(|q| format!("{:.2}", q))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    out.push_str(&format!("{}\n", tiers));

    if !stats.recent_runs.is_empty() {
        out.push_str("Recent runs:\n");
        out.push_str(&format_runs_table(&stats.recent_runs));
        out.push('\n');
    }
    out
}

/// Format per-stage quality, flagging keys below `threshold`.
pub fn format_quality_table(stats: &[StageQualityStats], threshold: f64) -> String {
    let mut table = new_table(vec![
        "Workflow", "Stage", "Tier", "Samples", "Avg", "Min", "Max", "Trend",
    ]);

    for s in stats {
        let avg = format!("{:.2}", s.avg_quality);
        let avg = if s.avg_quality < threshold {
            avg.red().to_string()
        } else {
            avg
        };
        let trend = format!("{} ({:+.2})", s.direction, s.trend);
        let trend = match s.direction {
            Trend::Improving => trend.green().to_string(),
            Trend::Declining => trend.red().to_string(),
            Trend::Stable => trend,
        };
        table.add_row(vec![
            Cell::new(&s.workflow),
            Cell::new(&s.stage),
            Cell::new(s.tier),
            Cell::new(s.samples),
            Cell::new(avg),
            Cell::new(format!("{:.2}", s.min_quality)),
            Cell::new(format!("{:.2}", s.max_quality)),
            Cell::new(trend),
        ]);
    }

    table.to_string()
}

/// Wrap `value` under `key` as pretty JSON.
pub fn format_json<T: Serialize + ?Sized>(
    key: &str,
    value: &T,
) -> Result<String, serde_json::Error> {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert(key.to_string(), serde_json::to_value(value)?);
    serde_json::to_string_pretty(&serde_json::Value::Object(wrapper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::CostReport;
    use crate::routing::Tier;

    fn sample_run() -> WorkflowRun {
        let mut run = WorkflowRun::start("security_audit", "openai");
        run.stages.push(StageOutcome {
            model: Some("gpt-4o-mini".to_string()),
            cost: 0.0012,
            input_tokens: 120,
            output_tokens: 40,
            quality_score: Some(0.75),
            cache_hit: true,
            ..StageOutcome::new("triage", Tier::Cheap)
        });
        run.stages
            .push(StageOutcome::skipped("report", Tier::Premium, "nothing found"));
        run.complete(
            CostReport {
                total_cost: 0.0012,
                baseline_cost: 0.01,
                savings: 0.0088,
                savings_percent: 0.88,
                ..Default::default()
            },
            None,
        );
        run
    }

    #[test]
    fn test_usd_and_percent() {
        assert_eq!(usd(0.0012), "$0.001200");
        assert_eq!(percent(0.88), "88.0%");
    }

    #[test]
    fn test_format_run_report() {
        let output = format_run_report(&sample_run());
        assert!(output.contains("security_audit"));
        assert!(output.contains("triage"));
        assert!(output.contains("gpt-4o-mini"));
        assert!(output.contains("nothing found"));
        assert!(output.contains("88.0%"));
        assert!(!output.contains("Error:"));
    }

    #[test]
    fn test_format_run_report_failed() {
        let mut run = sample_run();
        run.fail("stage 'triage' failed");
        let output = format_run_report(&run);
        assert!(output.contains("stage 'triage' failed"));
        assert!(output.starts_with("✗"));
    }

    #[test]
    fn test_format_stats_table_empty() {
        let output = format_stats_table(&AggregateStats::default());
        assert!(output.contains("Runs: 0"));
        assert!(output.contains("No runs recorded yet."));
    }

    #[test]
    fn test_format_quality_table() {
        let stats = vec![StageQualityStats {
            workflow: "security_audit".to_string(),
            stage: "triage".to_string(),
            tier: Tier::Cheap,
            samples: 10,
            avg_quality: 0.5,
            min_quality: 0.4,
            max_quality: 0.6,
            trend: 0.0,
            direction: Trend::Stable,
        }];
        let output = format_quality_table(&stats, 0.7);
        assert!(output.contains("triage"));
        assert!(output.contains("stable"));
        assert!(output.contains("Samples"));
    }

    #[test]
    fn test_format_json_valid() {
        let output = format_json("run", &sample_run()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["run"]["workflow_name"], "security_audit");
        assert_eq!(parsed["run"]["stages"].as_array().unwrap().len(), 2);
    }
}
