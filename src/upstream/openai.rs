//! OpenAI-compatible HTTP inference client.

use super::{estimate_tokens, InferenceClient, InferenceRequest, InferenceResponse, UpstreamError};
use crate::config::UpstreamConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Client for any endpoint speaking `POST /v1/chat/completions`.
///
/// Sends the stage's system prompt and user content as a two-message chat
/// and reads the first choice plus the `usage` block.
pub struct OpenAiCompatibleClient {
    /// Provider name recorded with runs
    provider: String,
    /// Base URL (e.g., "https://api.openai.com")
    base_url: String,
    /// Bearer token, if the endpoint needs one
    api_key: Option<String>,
    /// Shared HTTP client for connection pooling
    client: Arc<Client>,
}

impl OpenAiCompatibleClient {
    pub fn new(provider: String, base_url: String, api_key: Option<String>) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: Arc::new(Client::new()),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            config.provider.clone(),
            config.base_url.clone(),
            config.api_key(),
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl InferenceClient for OpenAiCompatibleClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn invoke(
        &self,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<InferenceResponse, UpstreamError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let timeout_ms = timeout.as_millis() as u64;

        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_content,
        });
        let body = ChatRequest {
            model: &request.model,
            messages,
            stream: false,
        };

        let mut builder = self.client.post(&url).json(&body).timeout(timeout);
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(timeout_ms)
            } else {
                UpstreamError::ServiceUnavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match UpstreamError::from_status(status.as_u16(), error_body) {
                UpstreamError::Timeout(_) => UpstreamError::Timeout(timeout_ms),
                other => other,
            });
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(timeout_ms)
            } else {
                UpstreamError::ServiceUnavailable(format!(
                    "Failed to parse completion response: {}",
                    e
                ))
            }
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                UpstreamError::ServiceUnavailable("Completion response had no content".to_string())
            })?;

        let (input_tokens, output_tokens) = match completion.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (
                estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_content),
                estimate_tokens(&text),
            ),
        };

        Ok(InferenceResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}
