//! Shared test utilities for Tierflow integration tests.
//!
//! Provides a scripted inference client and helpers for wiring executors and
//! coordinators without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tierflow::config::{ExecutorConfig, TiersConfig};
use tierflow::executor::StageExecutor;
use tierflow::routing::{Complexity, CostOptimized, RoutingPolicy, Tier};
use tierflow::upstream::{InferenceClient, InferenceRequest, InferenceResponse, UpstreamError};
use tierflow::workflow::{StageSpec, WorkflowDefinition};

/// Input tokens reported by [`MockClient`] for every call.
pub const MOCK_INPUT_TOKENS: u32 = 1_000;

/// Output tokens reported by [`MockClient`] for every call.
pub const MOCK_OUTPUT_TOKENS: u32 = 200;

/// Answers every call, optionally after a delay, and counts calls.
#[derive(Default)]
pub struct MockClient {
    calls: AtomicUsize,
    tiers: Mutex<Vec<Tier>>,
    delay: Option<Duration>,
    fail_tier: Option<(Tier, UpstreamError)>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call routed to `tier` fails with `error`.
    pub fn failing_on(mut self, tier: Tier, error: UpstreamError) -> Self {
        self.fail_tier = Some((tier, error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.tiers.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for MockClient {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn invoke(
        &self,
        request: &InferenceRequest,
        _timeout: Duration,
    ) -> Result<InferenceResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tiers.lock().unwrap().push(request.tier);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((tier, error)) = &self.fail_tier {
            if *tier == request.tier {
                return Err(error.clone());
            }
        }
        Ok(InferenceResponse {
            text: format!("[{}] {}", request.tier, request.user_content),
            input_tokens: MOCK_INPUT_TOKENS,
            output_tokens: MOCK_OUTPUT_TOKENS,
        })
    }
}

/// Executor config with millisecond backoff so retry tests stay fast.
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        backoff_ms: 1,
        ..Default::default()
    }
}

/// Cost-optimized executor over `client` with default tiers and no cache.
pub fn make_executor(client: Arc<MockClient>) -> StageExecutor {
    let policy: Arc<dyn RoutingPolicy> = Arc::new(CostOptimized);
    StageExecutor::new(
        policy,
        client,
        TiersConfig::default(),
        fast_executor_config(),
    )
}

/// The three-stage audit workflow: simple, complex, simple.
///
/// The complex stage is not cacheable, so a repeated run only hits the cache
/// on the two simple stages.
pub fn audit_workflow() -> WorkflowDefinition {
    let mut analysis =
        StageSpec::new("analysis", Complexity::Complex).with_prompt("Analyze: {previous}");
    analysis.cacheable = false;

    WorkflowDefinition::new(
        "security_audit",
        vec![
            StageSpec::new("triage", Complexity::Simple),
            analysis,
            StageSpec::new("summary", Complexity::Simple).with_prompt("Summarize for {input}"),
        ],
    )
}
