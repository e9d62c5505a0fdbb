//! Drives a workflow definition through the stage executor.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{WorkflowDefinition, WorkflowError, WorkflowRun};
use crate::accounting::CostAccountant;
use crate::executor::{StageExecutor, StageRequest};
use crate::history::HistoryStore;

/// Runs workflows stage by stage and persists each finished run.
///
/// The executor (and with it the cache, policy and quality tracker) and the
/// history store are injected; one coordinator may run many workflows
/// concurrently.
pub struct WorkflowCoordinator {
    executor: Arc<StageExecutor>,
    history: Option<Arc<dyn HistoryStore>>,
    default_budget: Option<f64>,
}

impl WorkflowCoordinator {
    pub fn new(executor: Arc<StageExecutor>) -> Self {
        Self {
            executor,
            history: None,
            default_budget: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Budget used when a definition does not declare one.
    pub fn with_default_budget(mut self, budget: f64) -> Self {
        self.default_budget = Some(budget);
        self
    }

    pub fn executor(&self) -> &Arc<StageExecutor> {
        &self.executor
    }

    /// Execute `definition` against `input`.
    ///
    /// Only an invalid definition returns `Err`. Stage and persistence
    /// failures come back as a run with `success == false` and `error` set;
    /// stages completed before the failure are kept.
    ///
    /// Cancellation is checked before each stage. A stage already in flight
    /// always runs to completion or timeout.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        definition.validate()?;

        let mut run = WorkflowRun::start(&definition.name, self.executor.provider());
        let mut accountant = CostAccountant::new(self.executor.prices());
        let budget = definition.budget.or(self.default_budget);
        let mut previous: Option<String> = None;
        let mut error: Option<String> = None;

        tracing::info!(
            workflow = %definition.name,
            run_id = %run.run_id,
            stages = definition.stages.len(),
            "Workflow run started"
        );

        for spec in &definition.stages {
            if cancel.is_cancelled() {
                tracing::warn!(run_id = %run.run_id, stage = %spec.name, "Run cancelled");
                error = Some(format!("run cancelled before stage '{}'", spec.name));
                break;
            }

            let request = StageRequest {
                workflow: definition.name.clone(),
                stage: spec.name.clone(),
                task_type: spec.task_type().to_string(),
                complexity: spec.complexity,
                latency: spec.latency,
                system_prompt: spec.system_prompt.clone(),
                user_content: spec.render_prompt(input, previous.as_deref().unwrap_or_default()),
                cacheable: spec.cacheable,
                expected_keywords: spec.expected_keywords.clone(),
                remaining_budget: budget.map(|b| b - accountant.total_spent()),
                total_budget: budget,
            };

            if let Some(reason) = spec.skip_reason(previous.as_deref()) {
                let execution = self.executor.skip(&request, &reason, &mut accountant);
                run.stages.push(execution.outcome);
                continue;
            }

            match self.executor.execute(&request, &mut accountant).await {
                Ok(execution) => {
                    run.stages.push(execution.outcome);
                    run.output = Some(execution.output.clone());
                    previous = Some(execution.output);
                }
                Err(e) => {
                    tracing::warn!(run_id = %run.run_id, error = %e, "Stage failed, ending run");
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        run.complete(accountant.finalize(), error);
        metrics::counter!("tierflow_runs_total", "success" => run.success.to_string())
            .increment(1);

        if let Some(history) = &self.history {
            if let Err(e) = history.record_run(&run).await {
                run.fail(format!("failed to persist run: {}", e));
            }
        }

        tracing::info!(
            workflow = %run.workflow_name,
            run_id = %run.run_id,
            success = run.success,
            total_cost = run.cost.total_cost,
            savings = run.cost.savings,
            cache_hits = run.cost.cache_hits,
            duration_ms = run.duration_ms,
            "Workflow run finished"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, TiersConfig};
    use crate::history::{PersistenceError, RunFilter, SqliteHistoryStore};
    use crate::quality::QualitySample;
    use crate::routing::{Complexity, CostOptimized, Tier};
    use crate::upstream::{InferenceClient, InferenceRequest, InferenceResponse, UpstreamError};
    use crate::workflow::StageSpec;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Echoes the prompt; fails for any prompt containing "explode".
    struct EchoClient;

    #[async_trait]
    impl InferenceClient for EchoClient {
        fn provider(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            request: &InferenceRequest,
            _timeout: Duration,
        ) -> Result<InferenceResponse, UpstreamError> {
            if request.user_content.contains("explode") {
                return Err(UpstreamError::InvalidRequest("400: refused".into()));
            }
            Ok(InferenceResponse {
                text: format!("[{}] {}", request.tier, request.user_content),
                input_tokens: 500,
                output_tokens: 100,
            })
        }
    }

    struct FailingHistory;

    #[async_trait]
    impl HistoryStore for FailingHistory {
        async fn record_run(&self, _: &WorkflowRun) -> Result<(), PersistenceError> {
            Err(PersistenceError::InvalidRecord("disk full".into()))
        }
        async fn query_runs(
            &self,
            _: &RunFilter,
            _: usize,
        ) -> Result<Vec<crate::history::RunRecord>, PersistenceError> {
            Ok(Vec::new())
        }
        async fn get_stats(&self) -> Result<crate::history::AggregateStats, PersistenceError> {
            Ok(Default::default())
        }
        async fn quality_samples(
            &self,
            _: Option<chrono::DateTime<chrono::Utc>>,
        ) -> Result<Vec<QualitySample>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    fn coordinator() -> WorkflowCoordinator {
        let executor = StageExecutor::new(
            Arc::new(CostOptimized),
            Arc::new(EchoClient),
            TiersConfig::default(),
            ExecutorConfig::default(),
        );
        WorkflowCoordinator::new(Arc::new(executor))
    }

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "chain",
            vec![
                StageSpec::new("first", Complexity::Simple),
                StageSpec::new("second", Complexity::Complex).with_prompt("refine: {previous}"),
            ],
        )
    }

    #[tokio::test]
    async fn test_previous_output_feeds_next_stage() {
        let run = coordinator()
            .run(&chain(), "hello", &CancellationToken::new())
            .await
            .unwrap();

        assert!(run.success);
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[0].tier, Tier::Cheap);
        assert_eq!(run.stages[1].tier, Tier::Premium);
        assert_eq!(
            run.output.as_deref(),
            Some("[premium] refine: [cheap] hello")
        );
        assert!(run.cost.savings > 0.0);
    }

    #[tokio::test]
    async fn test_stage_failure_keeps_completed_stages() {
        let def = WorkflowDefinition::new(
            "boom",
            vec![
                StageSpec::new("ok", Complexity::Simple),
                StageSpec::new("bad", Complexity::Simple).with_prompt("explode {input}"),
                StageSpec::new("never", Complexity::Simple),
            ],
        );
        let run = coordinator()
            .run(&def, "x", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!run.success);
        assert_eq!(run.stages.len(), 1);
        assert!(run.error.as_deref().unwrap().contains("bad"));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_next_stage() {
        let token = CancellationToken::new();
        token.cancel();
        let run = coordinator().run(&chain(), "x", &token).await.unwrap();

        assert!(!run.success);
        assert!(run.stages.is_empty());
        assert!(run.error.as_deref().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_empty_workflow_is_a_hard_error() {
        let def = WorkflowDefinition::new("empty", Vec::new());
        let result = coordinator()
            .run(&def, "x", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WorkflowError::EmptyWorkflow(_))));
    }

    #[tokio::test]
    async fn test_skipped_stage_is_recorded_in_order() {
        let mut def = chain();
        def.stages[0].skip = Some("disabled".to_string());
        let run = coordinator()
            .run(&def, "x", &CancellationToken::new())
            .await
            .unwrap();

        assert!(run.success);
        assert!(run.stages[0].skipped);
        assert_eq!(run.stages[0].cost, 0.0);
        assert!(!run.stages[1].skipped);
    }

    #[tokio::test]
    async fn test_run_is_persisted() {
        let store = Arc::new(SqliteHistoryStore::open_in_memory().unwrap());
        let coordinator = coordinator().with_history(store.clone());
        let run = coordinator
            .run(&chain(), "x", &CancellationToken::new())
            .await
            .unwrap();

        let records = store.query_runs(&RunFilter::default(), 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, run.run_id);
        assert_eq!(records[0].stages.len(), 2);
        assert_eq!(records[0].provider, "echo");
    }

    #[tokio::test]
    async fn test_persistence_failure_marks_run_failed() {
        let coordinator = coordinator().with_history(Arc::new(FailingHistory));
        let run = coordinator
            .run(&chain(), "x", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!run.success);
        assert!(run.error.unwrap().contains("persist"));
    }
}
