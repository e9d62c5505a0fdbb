//! Terminal stage failures.

use thiserror::Error;

use crate::quality::ScoringError;
use crate::routing::Tier;
use crate::upstream::UpstreamError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// Upstream call failed after retries and any fallback.
    #[error("stage '{stage}' failed at tier {tier}: {source}")]
    Upstream {
        stage: String,
        tier: Tier,
        #[source]
        source: UpstreamError,
    },

    #[error("stage '{stage}' scoring failed: {source}")]
    Scoring {
        stage: String,
        #[source]
        source: ScoringError,
    },
}

impl StageError {
    pub fn stage(&self) -> &str {
        match self {
            StageError::Upstream { stage, .. } | StageError::Scoring { stage, .. } => stage,
        }
    }
}
