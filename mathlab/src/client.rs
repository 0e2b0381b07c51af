//! Model client: one prompt in, one text out
//!
//! The client is built from an explicit [`ModelConfig`]. Without a credential
//! it stays in the `Unconfigured` state: construction succeeds, a warning is
//! available for display, and every call fails with a provider-side error.

use crate::provider::{build_provider, check_provider, HealthStatus, LlmProvider, LlmRequest, ProviderError};
use crate::ModelConfig;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Model client not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Whether a credential was supplied at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Unconfigured,
    Configured,
}

enum Backend {
    Unconfigured { hint: String },
    Configured(Arc<dyn LlmProvider>),
}

/// Client for the text-generation model
pub struct ModelClient {
    backend: Backend,
    model: String,
    temperature: Option<f32>,
}

impl ModelClient {
    /// Build from configuration, reading the credential from the config or
    /// the environment. A missing credential is not an error; an unknown
    /// provider is, with or without one.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ProviderError> {
        check_provider(&config.provider)?;
        match config.resolve_api_key() {
            Some(key) => {
                let provider = build_provider(config, key)?;
                info!(
                    provider = provider.name(),
                    model = provider.model(),
                    "Model client configured"
                );
                Ok(Self {
                    backend: Backend::Configured(provider),
                    model: config.model.clone(),
                    temperature: config.temperature,
                })
            }
            None => {
                let hint = format!(
                    "API key missing. Set {} or add api_key to the [model] section of the config.",
                    config.api_key_env
                );
                warn!(env = %config.api_key_env, "{}", hint);
                Ok(Self {
                    backend: Backend::Unconfigured { hint },
                    model: config.model.clone(),
                    temperature: config.temperature,
                })
            }
        }
    }

    /// Wrap an already-built provider
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        let model = provider.model().to_string();
        Self {
            backend: Backend::Configured(provider),
            model,
            temperature: None,
        }
    }

    /// Create a client with no credential
    pub fn unconfigured(hint: impl Into<String>) -> Self {
        Self {
            backend: Backend::Unconfigured { hint: hint.into() },
            model: String::new(),
            temperature: None,
        }
    }

    pub fn status(&self) -> ClientStatus {
        match self.backend {
            Backend::Unconfigured { .. } => ClientStatus::Unconfigured,
            Backend::Configured(_) => ClientStatus::Configured,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Warning to show before any call is made, if the client is unusable
    pub fn config_warning(&self) -> Option<&str> {
        match &self.backend {
            Backend::Unconfigured { hint } => Some(hint),
            Backend::Configured(_) => None,
        }
    }

    /// Send a prompt and return the model's raw text
    pub async fn generate(&self, prompt: &str) -> Result<String, ClientError> {
        let provider = match &self.backend {
            Backend::Configured(p) => p,
            Backend::Unconfigured { hint } => {
                return Err(ClientError::NotConfigured(hint.clone()));
            }
        };

        let request = LlmRequest::new(prompt).with_temperature(self.temperature);
        let response = provider.complete(&request).await?;

        debug!(
            provider = provider.name(),
            content_len = response.content.len(),
            duration_ms = ?response.duration_ms,
            total_tokens = ?response.usage.as_ref().map(|u| u.total_tokens),
            "Got LLM response"
        );

        Ok(response.content)
    }

    /// Check the provider; an unconfigured client is reported unhealthy
    pub async fn health_check(&self) -> HealthStatus {
        match &self.backend {
            Backend::Configured(p) => p.health_check().await,
            Backend::Unconfigured { hint } => HealthStatus {
                healthy: false,
                latency_ms: None,
                error: Some(hint.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_key() -> ModelConfig {
        ModelConfig {
            api_key: None,
            api_key_env: "MATHLAB_TEST_DEFINITELY_UNSET".to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_missing_key_is_unconfigured_not_error() {
        let client = ModelClient::from_config(&config_without_key()).unwrap();
        assert_eq!(client.status(), ClientStatus::Unconfigured);
        let warning = client.config_warning().unwrap();
        assert!(warning.contains("MATHLAB_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_explicit_key_is_configured() {
        let config = ModelConfig {
            api_key: Some("test-key".to_string()),
            ..ModelConfig::default()
        };
        let client = ModelClient::from_config(&config).unwrap();
        assert_eq!(client.status(), ClientStatus::Configured);
        assert!(client.config_warning().is_none());
        assert_eq!(client.model(), "gemini-1.5-flash");
    }

    #[test]
    fn test_unknown_provider_rejected_without_key() {
        let config = ModelConfig {
            provider: "gemnii".to_string(),
            ..config_without_key()
        };
        let err = ModelClient::from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(ref name) if name == "gemnii"));
    }

    #[tokio::test]
    async fn test_unconfigured_generate_fails() {
        let client = ModelClient::from_config(&config_without_key()).unwrap();
        let err = client.generate("Graph y = x").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured(_)));
        assert!(err.to_string().contains("API key missing"));
    }

    #[tokio::test]
    async fn test_unconfigured_health() {
        let client = ModelClient::unconfigured("no key");
        let health = client.health_check().await;
        assert!(!health.healthy);
        assert_eq!(health.error.as_deref(), Some("no key"));
    }
}
