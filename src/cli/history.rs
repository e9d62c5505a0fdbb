//! `tierflow history`, `tierflow stats` and `tierflow import`

use std::error::Error;

use crate::cli::output::{format_json, format_runs_table, format_stats_table};
use crate::cli::{load_config, parse_since, HistoryArgs, ImportArgs, StatsArgs};
use crate::history::{HistoryStore, RunFilter, SqliteHistoryStore};

fn open_store(config_path: &std::path::Path) -> Result<SqliteHistoryStore, Box<dyn Error>> {
    let config = load_config(config_path)?;
    Ok(SqliteHistoryStore::from_config(&config.history)?)
}

/// Build the query filter from command arguments.
pub fn filter_from_args(args: &HistoryArgs) -> Result<RunFilter, Box<dyn Error>> {
    let mut filter = RunFilter::default();
    if let Some(workflow) = &args.workflow {
        filter = filter.workflow(workflow);
    }
    if let Some(provider) = &args.provider {
        filter = filter.provider(provider);
    }
    if let Some(since) = parse_since(args.since.as_deref())? {
        filter = filter.since(since);
    }
    if args.success_only {
        filter = filter.success_only();
    }
    Ok(filter)
}

/// Render recorded runs from any history store.
pub async fn history_report(
    store: &dyn HistoryStore,
    args: &HistoryArgs,
) -> Result<String, Box<dyn Error>> {
    let filter = filter_from_args(args)?;
    let runs = store.query_runs(&filter, args.limit).await?;

    if args.json {
        return Ok(format_json("runs", &runs)?);
    }
    if runs.is_empty() {
        return Ok("No matching runs.".to_string());
    }
    Ok(format_runs_table(&runs))
}

/// Handle `tierflow history`
pub async fn handle_history(args: &HistoryArgs) -> Result<String, Box<dyn Error>> {
    let store = open_store(&args.config)?;
    history_report(&store, args).await
}

/// Handle `tierflow stats`
pub async fn handle_stats(args: &StatsArgs) -> Result<String, Box<dyn Error>> {
    let store = open_store(&args.config)?;
    let stats = store.get_stats().await?;
    if args.json {
        Ok(format_json("stats", &stats)?)
    } else {
        Ok(format_stats_table(&stats))
    }
}

/// Handle `tierflow import`
pub async fn handle_import(args: &ImportArgs) -> Result<String, Box<dyn Error>> {
    let store = open_store(&args.config)?;
    let summary = store.import_legacy_json(&args.path).await?;
    Ok(format!(
        "✓ Imported {} run(s) from {} ({} already present) into {}",
        summary.imported,
        args.path.display(),
        summary.skipped,
        store.path().display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::CostReport;
    use crate::workflow::WorkflowRun;
    use std::path::PathBuf;

    fn args() -> HistoryArgs {
        HistoryArgs {
            workflow: None,
            provider: None,
            since: None,
            success_only: false,
            limit: 20,
            json: false,
            config: PathBuf::from("tierflow.toml"),
        }
    }

    async fn seeded_store() -> SqliteHistoryStore {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        for (workflow, error) in [("audit", None), ("audit", Some("boom")), ("summary", None)] {
            let mut run = WorkflowRun::start(workflow, "openai");
            run.complete(CostReport::default(), error.map(str::to_string));
            store.record_run(&run).await.unwrap();
        }
        store
    }

    #[test]
    fn test_filter_from_args() {
        let mut a = args();
        a.workflow = Some("audit".to_string());
        a.since = Some("2024-05-01T00:00:00Z".to_string());
        a.success_only = true;
        let filter = filter_from_args(&a).unwrap();
        assert_eq!(filter.workflow_name.as_deref(), Some("audit"));
        assert!(filter.since.is_some());
        assert!(filter.success_only);
    }

    #[test]
    fn test_filter_rejects_bad_since() {
        let mut a = args();
        a.since = Some("last week".to_string());
        assert!(filter_from_args(&a).is_err());
    }

    #[tokio::test]
    async fn test_history_report_table() {
        let store = seeded_store().await;
        let mut a = args();
        a.workflow = Some("audit".to_string());
        let output = history_report(&store, &a).await.unwrap();
        assert!(output.contains("audit"));
        assert!(!output.contains("summary"));
    }

    #[tokio::test]
    async fn test_history_report_json_success_only() {
        let store = seeded_store().await;
        let mut a = args();
        a.json = true;
        a.success_only = true;
        let output = history_report(&store, &a).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let runs = parsed["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r["success"] == true));
    }

    #[tokio::test]
    async fn test_history_report_empty() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        assert_eq!(
            history_report(&store, &args()).await.unwrap(),
            "No matching runs."
        );
    }
}
