//! Upstream inference service configuration

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Provider name recorded with every run
    pub provider: String,
    /// Base URL; `/v1/chat/completions` is appended
    pub base_url: String,
    /// Environment variable holding the API key, if the endpoint needs one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::invalid(
                "upstream.provider",
                "provider cannot be empty",
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "upstream.base_url",
                "URL must start with http:// or https://",
            ));
        }
        Ok(())
    }
}
