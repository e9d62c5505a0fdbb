//! End-to-end workflow runs through the coordinator with a mock upstream.

mod common;

use common::{audit_workflow, make_executor, MockClient};
use std::sync::Arc;
use std::time::Duration;
use tierflow::cache::FingerprintCache;
use tierflow::history::{HistoryStore, RunFilter, SqliteHistoryStore};
use tierflow::routing::{BudgetAware, Complexity, Tier};
use tierflow::upstream::UpstreamError;
use tierflow::workflow::{StageSpec, WorkflowCoordinator, WorkflowDefinition};
use tokio_util::sync::CancellationToken;

fn coordinator_with_cache(client: Arc<MockClient>) -> WorkflowCoordinator {
    let executor = make_executor(client).with_cache(Arc::new(FingerprintCache::in_memory(100)));
    WorkflowCoordinator::new(Arc::new(executor))
}

fn tiers(run: &tierflow::workflow::WorkflowRun) -> Vec<Tier> {
    run.stages.iter().map(|s| s.tier).collect()
}

#[tokio::test]
async fn test_audit_routes_cheap_premium_cheap() {
    let client = Arc::new(MockClient::new());
    let coordinator = coordinator_with_cache(client.clone());

    let run = coordinator
        .run(&audit_workflow(), "fn login()", &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.success, "run failed: {:?}", run.error);
    assert_eq!(tiers(&run), vec![Tier::Cheap, Tier::Premium, Tier::Cheap]);
    assert_eq!(client.calls(), 3);
    assert!(run.cost.total_cost > 0.0);
    assert!(run.cost.savings > 0.0);
    assert!(run.cost.total_cost + run.cost.savings <= run.cost.baseline_cost + 1e-12);
}

#[tokio::test]
async fn test_second_run_hits_cache_on_simple_stages() {
    let client = Arc::new(MockClient::new());
    let coordinator = coordinator_with_cache(client.clone());
    let cancel = CancellationToken::new();

    let first = coordinator
        .run(&audit_workflow(), "fn login()", &cancel)
        .await
        .unwrap();
    let second = coordinator
        .run(&audit_workflow(), "fn login()", &cancel)
        .await
        .unwrap();

    assert_eq!(first.cost.cache_hits, 0);
    assert_eq!(second.cost.cache_hits, 2);
    let hits: Vec<bool> = second.stages.iter().map(|s| s.cache_hit).collect();
    assert_eq!(hits, vec![true, false, true]);

    assert!(second.cost.cache_savings > 0.0);
    assert!(second.cost.total_cost < first.cost.total_cost);
    // Only the uncacheable premium stage reached upstream again
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_fetch_per_cacheable_stage() {
    let client = Arc::new(MockClient::new().with_delay(Duration::from_millis(30)));
    let coordinator = Arc::new(coordinator_with_cache(client.clone()));
    let workflow = audit_workflow();
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        coordinator.run(&workflow, "fn login()", &cancel),
        coordinator.run(&workflow, "fn login()", &cancel)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.success && b.success);
    assert_eq!(a.cost.cache_hits + b.cost.cache_hits, 2);
    // triage once, analysis twice (uncacheable), summary once
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn test_premium_outage_falls_back_to_capable() {
    let client = Arc::new(
        MockClient::new()
            .failing_on(Tier::Premium, UpstreamError::ServiceUnavailable("down".into())),
    );
    let coordinator = coordinator_with_cache(client.clone());

    let run = coordinator
        .run(&audit_workflow(), "fn login()", &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.success);
    let analysis = &run.stages[1];
    assert_eq!(analysis.tier, Tier::Capable);
    assert_eq!(analysis.fell_back_from, Some(Tier::Premium));
    // 3 premium attempts (1 + 2 retries), then capable
    let premium_calls = client.tiers().iter().filter(|t| **t == Tier::Premium).count();
    assert_eq!(premium_calls, 3);
}

#[tokio::test]
async fn test_rejected_stage_fails_run_and_keeps_prior_stages() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteHistoryStore::open(dir.path().join("h.sqlite"), Duration::from_secs(5)).unwrap());
    let client = Arc::new(
        MockClient::new().failing_on(Tier::Premium, UpstreamError::InvalidRequest("400".into())),
    );
    let coordinator = coordinator_with_cache(client.clone()).with_history(store.clone());

    let run = coordinator
        .run(&audit_workflow(), "fn login()", &CancellationToken::new())
        .await
        .unwrap();

    assert!(!run.success);
    assert!(run.error.as_deref().unwrap().contains("analysis"));
    assert_eq!(run.stages.len(), 1);
    assert_eq!(client.calls(), 2, "invalid requests are not retried");

    let stored = store.query_runs(&RunFilter::default(), 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].success);
    assert_eq!(stored[0].stages.len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_executes_nothing() {
    let client = Arc::new(MockClient::new());
    let coordinator = coordinator_with_cache(client.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = coordinator
        .run(&audit_workflow(), "fn login()", &cancel)
        .await
        .unwrap();

    assert!(!run.success);
    assert!(run.stages.is_empty());
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_budget_aware_steps_down_as_budget_drains() {
    let client = Arc::new(MockClient::new());
    let policy = Arc::new(BudgetAware::new(0.04));
    let executor = tierflow::executor::StageExecutor::new(
        policy,
        client.clone(),
        Default::default(),
        common::fast_executor_config(),
    );
    let coordinator = WorkflowCoordinator::new(Arc::new(executor));
    let workflow = WorkflowDefinition::new(
        "deep_review",
        vec![
            StageSpec::new("first", Complexity::Complex),
            StageSpec::new("second", Complexity::Complex),
            StageSpec::new("third", Complexity::Complex),
        ],
    )
    .with_budget(0.04);

    let run = coordinator
        .run(&workflow, "input", &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.success);
    assert_eq!(tiers(&run), vec![Tier::Premium, Tier::Capable, Tier::Cheap]);
}

#[tokio::test]
async fn test_budget_aware_uses_workflow_budget_over_configured_total() {
    let client = Arc::new(MockClient::new());
    let policy = Arc::new(BudgetAware::new(1.0));
    let executor = tierflow::executor::StageExecutor::new(
        policy,
        client.clone(),
        Default::default(),
        common::fast_executor_config(),
    );
    let coordinator = WorkflowCoordinator::new(Arc::new(executor)).with_default_budget(1.0);
    let stages = || {
        vec![
            StageSpec::new("first", Complexity::Complex),
            StageSpec::new("second", Complexity::Complex),
        ]
    };

    // half the configured total, untouched: still the full run budget
    let roomy = WorkflowDefinition::new("roomy", stages()).with_budget(0.5);
    let run = coordinator
        .run(&roomy, "input", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(tiers(&run), vec![Tier::Premium, Tier::Premium]);

    // tight run budget: one premium stage drains it below 20%
    let tight = WorkflowDefinition::new("tight", stages()).with_budget(0.035);
    let run = coordinator
        .run(&tight, "input", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(tiers(&run), vec![Tier::Premium, Tier::Cheap]);
}

#[tokio::test]
async fn test_conditional_skip_records_reason_without_cost() {
    let client = Arc::new(MockClient::new());
    let coordinator = coordinator_with_cache(client.clone());
    let mut report = StageSpec::new("report", Complexity::Complex);
    // MockClient echoes the prompt, which carries the tier tag
    report.skip_if_previous_contains = Some("[cheap]".to_string());
    let workflow = WorkflowDefinition::new(
        "scan",
        vec![StageSpec::new("scan", Complexity::Simple), report],
    );

    let run = coordinator
        .run(&workflow, "clean file", &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.success);
    assert!(run.stages[1].skipped);
    assert_eq!(run.stages[1].cost, 0.0);
    assert!(run.stages[1].skip_reason.is_some());
    assert_eq!(client.calls(), 1);
}
