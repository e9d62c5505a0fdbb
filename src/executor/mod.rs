//! Single-stage execution pipeline.
//!
//! [`StageExecutor::execute`] drives one stage through routing, the
//! fingerprint cache, the upstream call (with bounded retry and one cheaper
//! fallback), scoring, and finally records cost and quality.
//!
//! # Retry and fallback
//!
//! - Transient upstream errors (`Timeout`, `RateLimited`,
//!   `ServiceUnavailable`) are retried up to `max_retries` times with
//!   exponential backoff, but only when the routing decision allowed
//!   fallback. A tier chosen without fallback permission gets one attempt.
//! - When retries are exhausted and fallback is allowed, the stage is
//!   re-routed once to the next cheaper tier, which gets the same bound.
//! - `InvalidRequest` is never retried and never falls back.

use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod error;
pub mod retry;
pub mod state;

pub use error::StageError;
pub use retry::RetryPolicy;
pub use state::{StageState, StateTrail};

use crate::accounting::{CostAccountant, PriceTable};
use crate::cache::{CacheEntry, CacheOutcome, Fingerprint, FingerprintCache};
use crate::config::{ExecutorConfig, TiersConfig};
use crate::logging::content_preview;
use crate::quality::{QualityScorer, QualityTracker, ScoringContext, ScoringError};
use crate::routing::{
    Complexity, LatencySensitivity, RoutingContext, RoutingDecision, RoutingPolicy, Tier,
};
use crate::upstream::{estimate_tokens, InferenceClient, InferenceRequest, UpstreamError};
use crate::workflow::StageOutcome;

/// Everything the executor needs to run one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageRequest {
    pub workflow: String,
    pub stage: String,
    pub task_type: String,
    pub complexity: Option<Complexity>,
    pub latency: LatencySensitivity,
    pub system_prompt: String,
    pub user_content: String,
    /// Whether the response may be served from / written to the cache
    pub cacheable: bool,
    pub expected_keywords: Vec<String>,
    /// Remaining run budget in USD
    pub remaining_budget: Option<f64>,
    /// Full run budget in USD
    pub total_budget: Option<f64>,
}

impl StageRequest {
    pub fn new(
        workflow: impl Into<String>,
        stage: impl Into<String>,
        complexity: Complexity,
        system_prompt: impl Into<String>,
        user_content: impl Into<String>,
    ) -> Self {
        let stage = stage.into();
        Self {
            workflow: workflow.into(),
            task_type: stage.clone(),
            stage,
            complexity: Some(complexity),
            system_prompt: system_prompt.into(),
            user_content: user_content.into(),
            cacheable: true,
            ..Default::default()
        }
    }

    pub fn routing_context(&self) -> RoutingContext {
        RoutingContext {
            task_type: self.task_type.clone(),
            estimated_input_tokens: estimate_tokens(&self.system_prompt)
                .saturating_add(estimate_tokens(&self.user_content)),
            complexity: self.complexity,
            remaining_budget: self.remaining_budget,
            total_budget: self.total_budget,
            latency: self.latency,
        }
    }
}

/// Result of a recorded stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageExecution {
    pub outcome: StageOutcome,
    /// Response text; empty for skipped stages
    pub output: String,
    pub states: Vec<StageState>,
}

/// Upstream result for one tier plus how it was obtained.
struct Fetched {
    entry: CacheEntry,
    cache_hit: bool,
}

/// Composes routing, caching, upstream calls, scoring and accounting for
/// one stage at a time. Shared by all runs of a coordinator.
pub struct StageExecutor {
    policy: Arc<dyn RoutingPolicy>,
    client: Arc<dyn InferenceClient>,
    cache: Option<Arc<FingerprintCache>>,
    scorer: Option<Arc<dyn QualityScorer>>,
    quality: Arc<QualityTracker>,
    tiers: TiersConfig,
    prices: PriceTable,
    config: ExecutorConfig,
    retry: RetryPolicy,
    content_logging: bool,
}

impl StageExecutor {
    pub fn new(
        policy: Arc<dyn RoutingPolicy>,
        client: Arc<dyn InferenceClient>,
        tiers: TiersConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            policy,
            client,
            cache: None,
            scorer: None,
            quality: Arc::new(QualityTracker::default()),
            prices: PriceTable::from_config(&tiers),
            tiers,
            retry: RetryPolicy::from_config(&config),
            config,
            content_logging: false,
        }
    }

    pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_quality_tracker(mut self, quality: Arc<QualityTracker>) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_content_logging(mut self, enabled: bool) -> Self {
        self.content_logging = enabled;
        self
    }

    pub fn prices(&self) -> PriceTable {
        self.prices
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    pub fn quality(&self) -> &Arc<QualityTracker> {
        &self.quality
    }

    pub fn cache(&self) -> Option<&Arc<FingerprintCache>> {
        self.cache.as_ref()
    }

    /// Record a stage that bypasses execution entirely.
    ///
    /// The outcome carries the tier the policy would have picked, with zero
    /// cost and no score.
    pub fn skip(
        &self,
        request: &StageRequest,
        reason: &str,
        accountant: &mut CostAccountant,
    ) -> StageExecution {
        let mut trail = StateTrail::new(&request.stage);
        let (context, _) = request.routing_context().sanitize();
        let tier = self.policy.decide(&context).tier;
        let outcome = StageOutcome::skipped(&request.stage, tier, reason);
        accountant.record(&outcome);
        trail.advance(StageState::Recorded);
        tracing::info!(workflow = %request.workflow, stage = %request.stage, reason, "Stage skipped");

        StageExecution {
            outcome,
            output: String::new(),
            states: trail.into_states(),
        }
    }

    /// Run one stage to `RECORDED` or `FAILED`.
    pub async fn execute(
        &self,
        request: &StageRequest,
        accountant: &mut CostAccountant,
    ) -> Result<StageExecution, StageError> {
        let started = Instant::now();
        let mut trail = StateTrail::new(&request.stage);

        trail.advance(StageState::Routing);
        let decision = self.route(request);
        let requested_tier = decision.tier;
        let model = self.resolve_model(&decision);

        let fetched = match self
            .fetch(request, decision.tier, &model, decision.can_fallback, &mut trail)
            .await
        {
            Ok(fetched) => fetched,
            Err(source) => {
                let retry_from = decision
                    .can_fallback
                    .then(|| requested_tier.cheaper())
                    .flatten()
                    .filter(|_| source.is_transient());

                match retry_from {
                    None => {
                        trail.advance(StageState::Failed);
                        return Err(StageError::Upstream {
                            stage: request.stage.clone(),
                            tier: requested_tier,
                            source,
                        });
                    }
                    Some(fallback_tier) => {
                        tracing::warn!(
                            stage = %request.stage,
                            from = %requested_tier,
                            to = %fallback_tier,
                            error = %source,
                            "Retries exhausted, falling back to cheaper tier"
                        );
                        metrics::counter!(
                            "tierflow_fallbacks_total",
                            "from" => requested_tier.as_str(),
                            "to" => fallback_tier.as_str(),
                        )
                        .increment(1);
                        trail.advance(StageState::Routing);
                        let fallback_model = self
                            .policy
                            .model_for(fallback_tier)
                            .unwrap_or_else(|| self.tiers.get(fallback_tier).model.clone());

                        match self
                            .fetch(request, fallback_tier, &fallback_model, true, &mut trail)
                            .await
                        {
                            Ok(fetched) => fetched,
                            Err(source) => {
                                trail.advance(StageState::Failed);
                                return Err(StageError::Upstream {
                                    stage: request.stage.clone(),
                                    tier: fallback_tier,
                                    source,
                                });
                            }
                        }
                    }
                }
            }
        };

        let Fetched { entry, cache_hit } = fetched;
        let mut outcome = StageOutcome {
            model: Some(entry.model.clone()),
            cost: if cache_hit { 0.0 } else { entry.cost },
            input_tokens: entry.response.input_tokens,
            output_tokens: entry.response.output_tokens,
            cache_hit,
            cache_savings: if cache_hit { entry.cost } else { 0.0 },
            fell_back_from: (entry.tier != requested_tier).then_some(requested_tier),
            ..StageOutcome::new(&request.stage, entry.tier)
        };

        if !cache_hit || self.config.score_cache_hits {
            trail.advance(StageState::Scoring);
            match self.score(request, &entry.response.text).await {
                Ok(score) => outcome.quality_score = score,
                Err(source) => {
                    trail.advance(StageState::Failed);
                    // Upstream spend counts even when the stage fails.
                    if !cache_hit {
                        outcome.duration_ms = started.elapsed().as_millis() as u64;
                        accountant.record(&outcome);
                    }
                    tracing::warn!(
                        stage = %request.stage,
                        cost = outcome.cost,
                        error = %source,
                        "Scoring failed"
                    );
                    return Err(StageError::Scoring {
                        stage: request.stage.clone(),
                        source,
                    });
                }
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        trail.advance(StageState::Recorded);
        accountant.record(&outcome);
        if let Some(score) = outcome.quality_score {
            self.quality
                .record(&request.workflow, &request.stage, outcome.tier, score);
        }

        tracing::debug!(
            stage = %request.stage,
            tier = %outcome.tier,
            cost = outcome.cost,
            cache_hit,
            output = content_preview(&entry.response.text, self.content_logging).as_deref(),
            "Stage recorded"
        );

        Ok(StageExecution {
            outcome,
            output: entry.response.text,
            states: trail.into_states(),
        })
    }

    fn route(&self, request: &StageRequest) -> RoutingDecision {
        let (context, problem) = request.routing_context().sanitize();
        if let Some(problem) = problem {
            tracing::warn!(stage = %request.stage, error = %problem, "Degraded routing context");
        }
        let decision = self.policy.decide(&context);
        tracing::debug!(
            stage = %request.stage,
            policy = self.policy.name(),
            tier = %decision.tier,
            can_fallback = decision.can_fallback,
            "Routed stage"
        );
        decision
    }

    fn resolve_model(&self, decision: &RoutingDecision) -> String {
        decision
            .model
            .clone()
            .unwrap_or_else(|| self.tiers.get(decision.tier).model.clone())
    }

    /// `CACHE_CHECK` through the end of `UPSTREAM_CALL` for one tier.
    async fn fetch(
        &self,
        request: &StageRequest,
        tier: Tier,
        model: &str,
        can_fallback: bool,
        trail: &mut StateTrail,
    ) -> Result<Fetched, UpstreamError> {
        trail.advance(StageState::CacheCheck);
        let upstream = InferenceRequest {
            tier,
            model: model.to_string(),
            system_prompt: request.system_prompt.clone(),
            user_content: request.user_content.clone(),
        };

        let cache = self.cache.as_ref().filter(|_| request.cacheable);
        let Some(cache) = cache else {
            trail.advance(StageState::UpstreamCall);
            let entry = self.invoke_with_retries(&upstream, can_fallback).await?;
            return Ok(Fetched {
                entry,
                cache_hit: false,
            });
        };

        let fingerprint = Fingerprint::compute(
            &request.system_prompt,
            &request.user_content,
            tier,
            model,
        );
        let result = cache
            .get_or_fetch(&fingerprint, || {
                self.invoke_with_retries(&upstream, can_fallback)
            })
            .await;

        match result {
            Ok(CacheOutcome::Miss(entry)) => {
                trail.advance(StageState::UpstreamCall);
                Ok(Fetched {
                    entry,
                    cache_hit: false,
                })
            }
            Ok(outcome) => {
                trail.advance(StageState::CacheHit);
                Ok(Fetched {
                    entry: outcome.into_entry(),
                    cache_hit: true,
                })
            }
            Err(e) => {
                trail.advance(StageState::UpstreamCall);
                Err(e)
            }
        }
    }

    /// Call upstream at one tier with the bounded retry policy.
    async fn invoke_with_retries(
        &self,
        request: &InferenceRequest,
        can_fallback: bool,
    ) -> Result<CacheEntry, UpstreamError> {
        let attempts = self.retry.attempts(can_fallback);
        let timeout = self.config.timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.invoke_once(request, timeout).await;
            metrics::counter!(
                "tierflow_upstream_calls_total",
                "tier" => request.tier.as_str(),
                "outcome" => match &result {
                    Ok(_) => "success",
                    Err(e) => e.kind(),
                },
            )
            .increment(1);

            match result {
                Ok(response) => {
                    let cost = self.prices.cost(
                        request.tier,
                        response.input_tokens,
                        response.output_tokens,
                    );
                    return Ok(CacheEntry::new(request.tier, &request.model, response, cost));
                }
                Err(e) if !e.is_transient() || attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry.delay(attempt - 1);
                    tracing::warn!(
                        tier = %request.tier,
                        model = %request.model,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One upstream call, bounded even if the client ignores its timeout.
    async fn invoke_once(
        &self,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<crate::upstream::InferenceResponse, UpstreamError> {
        match tokio::time::timeout(timeout, self.client.invoke(request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn score(
        &self,
        request: &StageRequest,
        output: &str,
    ) -> Result<Option<f64>, ScoringError> {
        let Some(scorer) = &self.scorer else {
            return Ok(None);
        };
        let context = ScoringContext {
            workflow: request.workflow.clone(),
            stage: request.stage.clone(),
            task_type: request.task_type.clone(),
            expected_keywords: request.expected_keywords.clone(),
        };
        let score = scorer.score(output, &context).await?;
        if !(0.0..=1.0).contains(&score) {
            return Err(ScoringError::OutOfRange(score));
        }
        Ok(Some(score))
    }
}
