//! `tierflow run` - execute a workflow definition

use std::error::Error;
use std::io::{IsTerminal, Read};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{build_backend, FingerprintCache};
use crate::cli::output::{format_json, format_run_report};
use crate::cli::{load_config, RunArgs};
use crate::config::TierflowConfig;
use crate::executor::StageExecutor;
use crate::history::SqliteHistoryStore;
use crate::logging::init_tracing;
use crate::quality::{KeywordScorer, QualityTracker};
use crate::routing::{build_policy, RoutingPolicy};
use crate::upstream::{InferenceClient, OpenAiCompatibleClient};
use crate::workflow::{WorkflowCoordinator, WorkflowDefinition};

/// Wire a coordinator from configuration: configured policy, HTTP client,
/// keyword scorer, optional cache and the SQLite history store.
pub fn build_coordinator(
    config: &TierflowConfig,
    client: Arc<dyn InferenceClient>,
    use_cache: bool,
) -> Result<WorkflowCoordinator, Box<dyn Error>> {
    let policy: Arc<dyn RoutingPolicy> = Arc::from(build_policy(&config.routing));

    let mut executor = StageExecutor::new(
        policy,
        client,
        config.tiers.clone(),
        config.executor.clone(),
    )
    .with_scorer(Arc::new(KeywordScorer))
    .with_quality_tracker(Arc::new(QualityTracker::from_config(&config.quality)))
    .with_content_logging(config.logging.enable_content_logging);

    if use_cache && config.cache.enabled {
        let backend = build_backend(&config.cache)?;
        executor = executor.with_cache(Arc::new(FingerprintCache::new(backend)));
    } else {
        tracing::debug!("Fingerprint cache disabled for this run");
    }

    let history = SqliteHistoryStore::from_config(&config.history)?;

    Ok(WorkflowCoordinator::new(Arc::new(executor))
        .with_history(Arc::new(history))
        .with_default_budget(config.routing.total_budget))
}

fn read_input(args: &RunArgs) -> Result<String, Box<dyn Error>> {
    if let Some(input) = &args.input {
        return Ok(input.clone());
    }
    if let Some(path) = &args.input_file {
        return std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read input file {}: {}", path.display(), e).into());
    }

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err("No workflow input: pass --input, --input-file or pipe it on stdin".into());
    }
    let mut input = String::new();
    stdin.read_to_string(&mut input)?;
    Ok(input)
}

/// Handle `tierflow run`.
///
/// A failed run still prints its report; the error only decides the exit
/// status.
pub async fn handle_run(args: &RunArgs) -> Result<String, Box<dyn Error>> {
    let mut config = load_config(&args.config)?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(policy) = &args.policy {
        config.routing.policy = policy.parse()?;
    }
    config.validate()?;
    init_tracing(&config.logging)?;

    let mut definition = WorkflowDefinition::load(&args.workflow)?;
    if let Some(budget) = args.budget {
        definition.budget = Some(budget);
    }
    let input = read_input(args)?;

    let client: Arc<dyn InferenceClient> =
        Arc::new(OpenAiCompatibleClient::from_config(&config.upstream));
    let coordinator = build_coordinator(&config, client, !args.no_cache)?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping before the next stage");
                cancel.cancel();
            }
        })
    };

    let run = coordinator.run(&definition, &input, &cancel).await;
    interrupt.abort();
    let run = run?;

    let mut output = if args.json {
        format_json("run", &run)?
    } else {
        format_run_report(&run)
    };
    if args.show_output && !args.json {
        if let Some(text) = &run.output {
            output.push('\n');
            output.push_str(text);
        }
    }

    if run.success {
        Ok(output)
    } else {
        println!("{}", output);
        Err(format!("workflow '{}' did not complete", run.workflow_name).into())
    }
}
