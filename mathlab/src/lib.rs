//! MathLab - turn a math question into an explanation and a chart
//!
//! This crate provides:
//! - LLM provider backends (Gemini, OpenAI-compatible)
//! - A model client with an explicit unconfigured state
//! - Prompt templates and fence sanitization for model output
//! - A plot-script sandbox: JSON commands interpreted in pure Rust
//! - An SVG renderer for the resulting chart
//! - A REST API and single-page UI

pub mod api;
pub mod client;
pub mod lab;
pub mod prompts;
pub mod provider;
pub mod render;
pub mod sanitize;
pub mod script;
pub mod view;

#[cfg(test)]
mod scenario_tests;

pub use client::{ClientError, ClientStatus, ModelClient};
pub use lab::{BuildOutcome, LabError, MathLab, RequestState};
pub use provider::{LlmProvider, LlmRequest, LlmResponse};
pub use script::{Figure, Namespace, ScriptError};
pub use view::View;

use serde::Deserialize;

/// Top-level configuration, usually read from `mathlab.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Model provider settings
    pub model: ModelConfig,

    /// Plot-script execution limits
    pub sandbox: SandboxConfig,

    /// Chart output size
    pub chart: ChartConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

impl LabConfig {
    /// Parse a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

/// Configuration for the model provider
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Provider type: "gemini" or "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the provider's base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key given directly (takes precedence over `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable the API key is read from
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String { "gemini".to_string() }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout_secs() -> u64 { 300 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Resolve the credential: explicit key first, then the environment.
    /// Blank values count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Resource limits for plot-script execution
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Maximum script size in bytes
    #[serde(default = "default_max_script_bytes")]
    pub max_script_bytes: usize,

    /// Maximum number of commands per script
    #[serde(default = "default_max_commands")]
    pub max_commands: usize,

    /// Maximum length of any array value
    #[serde(default = "default_max_points")]
    pub max_points: usize,

    /// Maximum points across all series of one figure
    #[serde(default = "default_max_figure_points")]
    pub max_figure_points: usize,

    /// Maximum expression nesting depth
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Wall-clock budget for one script
    #[serde(default = "default_sandbox_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_script_bytes() -> usize { 64 * 1024 }
fn default_max_commands() -> usize { 256 }
fn default_max_points() -> usize { 100_000 }
fn default_max_figure_points() -> usize { 400_000 }
fn default_max_expr_depth() -> usize { 64 }
fn default_sandbox_timeout_ms() -> u64 { 2000 }

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: default_max_script_bytes(),
            max_commands: default_max_commands(),
            max_points: default_max_points(),
            max_figure_points: default_max_figure_points(),
            max_expr_depth: default_max_expr_depth(),
            timeout_ms: default_sandbox_timeout_ms(),
        }
    }
}

/// Chart output size in pixels
#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_width")]
    pub width: u32,

    #[serde(default = "default_chart_height")]
    pub height: u32,
}

fn default_chart_width() -> u32 { 720 }
fn default_chart_height() -> u32 { 480 }

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_chart_width(),
            height: default_chart_height(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "0.0.0.0:8080".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}
