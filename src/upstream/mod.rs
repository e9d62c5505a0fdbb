//! Upstream inference interface.
//!
//! The engine treats the inference service as a black box behind
//! [`InferenceClient`]: a prompt pair and a tier go in, text and token counts
//! come out, or one of the [`UpstreamError`] kinds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub mod openai;

pub use error::UpstreamError;
pub use openai::OpenAiCompatibleClient;

use crate::routing::Tier;

/// One call to the inference service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub tier: Tier,
    /// Concrete model the tier resolved to
    pub model: String,
    pub system_prompt: String,
    pub user_content: String,
}

/// Successful inference result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Unified interface for the inference service.
///
/// # Object Safety
///
/// Designed to be used as `Arc<dyn InferenceClient>`.
///
/// # Cancellation
///
/// The executor never drops an in-flight call on run cancellation; a call
/// only ends by completing or hitting `timeout`.
#[async_trait]
pub trait InferenceClient: Send + Sync + 'static {
    /// Provider identifier recorded with each run (e.g., "openai").
    fn provider(&self) -> &str;

    /// Execute one completion, giving up after `timeout`.
    ///
    /// # Returns
    ///
    /// - `Ok(InferenceResponse)` on success
    /// - `Err(UpstreamError::Timeout)` if the call exceeded `timeout`
    /// - `Err(UpstreamError::RateLimited)` if the service throttled the call
    /// - `Err(UpstreamError::ServiceUnavailable)` on 5xx or connection failure
    /// - `Err(UpstreamError::InvalidRequest)` on any other rejection
    async fn invoke(
        &self,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<InferenceResponse, UpstreamError>;
}

/// Heuristic token count: one token per four characters, rounded up.
///
/// Used for routing estimates and when an endpoint omits usage figures.
pub fn estimate_tokens(text: &str) -> u32 {
    text.chars().count().div_ceil(4) as u32
}
