//! Stage execution state machine.

use serde::Serialize;

/// ```text
/// PENDING → ROUTING → CACHE_CHECK → {UPSTREAM_CALL | CACHE_HIT} → SCORING → RECORDED
///              ↑                         │
///              └──── fallback ───────────┘
/// ```
///
/// `FAILED` is reachable from `ROUTING`, `UPSTREAM_CALL` and `SCORING`.
/// Skipped stages go straight from `PENDING` to `RECORDED`, and cache hits
/// that are not scored go from `CACHE_HIT` to `RECORDED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    Routing,
    CacheCheck,
    UpstreamCall,
    CacheHit,
    Scoring,
    Recorded,
    Failed,
}

impl StageState {
    pub fn can_transition_to(self, next: StageState) -> bool {
        use StageState::*;
        matches!(
            (self, next),
            (Pending, Routing)
                | (Pending, Recorded)
                | (Routing, CacheCheck)
                | (Routing, Failed)
                | (CacheCheck, UpstreamCall)
                | (CacheCheck, CacheHit)
                | (UpstreamCall, Scoring)
                | (UpstreamCall, Routing)
                | (UpstreamCall, Failed)
                | (CacheHit, Scoring)
                | (CacheHit, Recorded)
                | (Scoring, Recorded)
                | (Scoring, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Recorded | StageState::Failed)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageState::Pending => "PENDING",
            StageState::Routing => "ROUTING",
            StageState::CacheCheck => "CACHE_CHECK",
            StageState::UpstreamCall => "UPSTREAM_CALL",
            StageState::CacheHit => "CACHE_HIT",
            StageState::Scoring => "SCORING",
            StageState::Recorded => "RECORDED",
            StageState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Visited states of one stage, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    stage: String,
    states: Vec<StageState>,
}

impl StateTrail {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            states: vec![StageState::Pending],
        }
    }

    pub fn current(&self) -> StageState {
        self.states
            .last()
            .copied()
            .unwrap_or(StageState::Pending)
    }

    pub fn advance(&mut self, next: StageState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal stage transition {} -> {}",
            current,
            next
        );
        tracing::debug!(stage = %self.stage, from = %current, to = %next, "Stage transition");
        self.states.push(next);
    }

    pub fn states(&self) -> &[StageState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<StageState> {
        self.states
    }
}
