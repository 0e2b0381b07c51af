//! LLM Provider abstraction and implementations

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::ModelConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with an LLM provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Provider returned error: {0}")]
    ProviderError(String),

    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),
}

/// Request to send to an LLM
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// The prompt text
    pub prompt: String,

    /// Temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temp: Option<f32>) -> Self {
        self.temperature = temp;
        self
    }
}

/// Response from an LLM
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<TokenUsage>,

    /// Time taken for generation (ms)
    pub duration_ms: Option<u64>,
}

/// Token usage statistics
#[derive(Debug, Clone, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Health status of a provider
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name for logging/identification
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;

    /// Send a completion request to the LLM
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    /// Check if the provider is reachable and accepts the credential
    async fn health_check(&self) -> HealthStatus;
}

/// Provider names accepted in `[model] provider`
pub const PROVIDERS: [&str; 2] = ["gemini", "openai"];

/// Reject a provider name nothing can be built for
pub fn check_provider(name: &str) -> Result<(), ProviderError> {
    if PROVIDERS.contains(&name) {
        Ok(())
    } else {
        Err(ProviderError::UnknownProvider(name.to_string()))
    }
}

/// Build the provider named in the configuration with the given credential
pub fn build_provider(
    config: &ModelConfig,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "gemini" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string());
            Ok(Arc::new(GeminiProvider::with_base_url(
                base_url,
                api_key,
                &config.model,
                timeout,
            )?))
        }
        "openai" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());
            Ok(Arc::new(OpenAiProvider::with_base_url(
                base_url,
                api_key,
                &config.model,
                timeout,
            )?))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> ProviderError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ProviderError::Auth(format!("HTTP {}: {}", status, body))
    } else {
        ProviderError::ProviderError(format!("HTTP {}: {}", status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_known_providers() {
        let mut config = ModelConfig::default();
        let p = build_provider(&config, "key".to_string()).unwrap();
        assert_eq!(p.name(), "gemini");
        assert_eq!(p.model(), "gemini-1.5-flash");

        config.provider = "openai".to_string();
        config.model = "gpt-4o-mini".to_string();
        let p = build_provider(&config, "key".to_string()).unwrap();
        assert_eq!(p.name(), "openai");
        assert_eq!(p.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_provider() {
        let config = ModelConfig {
            provider: "carrier-pigeon".to_string(),
            ..ModelConfig::default()
        };
        let err = build_provider(&config, "key".to_string()).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }

    #[test]
    fn test_check_provider_names() {
        for name in PROVIDERS {
            assert!(check_provider(name).is_ok());
        }
        let err = check_provider("gemnii").unwrap_err();
        assert_eq!(err.to_string(), "Unknown provider type: gemnii");
    }

    #[test]
    fn test_status_error_auth() {
        let err = status_error(reqwest::StatusCode::FORBIDDEN, "bad key".to_string());
        assert!(matches!(err, ProviderError::Auth(_)));
        let err = status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "quota".to_string());
        assert!(err.to_string().contains("429"));
    }
}
