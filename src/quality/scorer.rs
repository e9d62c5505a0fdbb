//! Pluggable quality scoring.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("scorer failed: {0}")]
    Failed(String),
    #[error("score {0} is outside 0.0..=1.0")]
    OutOfRange(f64),
}

/// What the scorer knows about the stage beyond its output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringContext {
    pub workflow: String,
    pub stage: String,
    pub task_type: String,
    pub expected_keywords: Vec<String>,
}

/// Scores a stage output in 0.0..=1.0.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, output: &str, context: &ScoringContext) -> Result<f64, ScoringError>;
}

/// Scores by the fraction of expected keywords present (case-insensitive).
///
/// Empty output scores 0. Non-empty output with no expected keywords scores 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

#[async_trait]
impl QualityScorer for KeywordScorer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn score(&self, output: &str, context: &ScoringContext) -> Result<f64, ScoringError> {
        if output.trim().is_empty() {
            return Ok(0.0);
        }
        let keywords: Vec<String> = context
            .expected_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Ok(1.0);
        }

        let haystack = output.to_lowercase();
        let found = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        Ok(found as f64 / keywords.len() as f64)
    }
}
