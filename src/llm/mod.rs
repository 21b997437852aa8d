//! Inference Gateway
//!
//! One capability interface, [`InferenceBackend`], with a local Ollama and a
//! hosted OpenAI-compatible implementation selected from configuration. The
//! [`InferenceGateway`] wraps whichever backend is configured with per-call
//! timeouts, exponential-backoff retries and a circuit breaker.

pub mod circuit_breaker;
pub mod gateway;
pub mod ollama;
pub mod openai;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use gateway::InferenceGateway;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::errors::{InferenceError, InferenceResult};

/// LLM response with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

impl LLMResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        }
    }
}

/// Fully rendered request for one advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub advisor: String,
    pub system: String,
    pub user: String,
    /// Overrides the backend's default model
    pub model: Option<String>,
    /// Overrides the backend's retry policy
    pub retry: Option<RetryPolicy>,
}

/// Exponential backoff settings for transient backend failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Jittered delays between attempts, doubling from `initial_backoff_ms`
    /// and capped at `max_backoff_ms`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let cap = self.max_backoff_ms.max(self.initial_backoff_ms);
        // base 2 times factor initial/2 gives initial, 2x initial, 4x initial ...
        ExponentialBackoff::from_millis(2)
            .factor((self.initial_backoff_ms / 2).max(1))
            .max_delay(Duration::from_millis(cap))
            .map(jitter)
            .take(self.max_retries)
    }
}

/// Which backend implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ollama,
    OpenAi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ollama => write!(f, "ollama"),
            BackendKind::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(BackendKind::Ollama),
            "openai" | "open_ai" | "cloud" => Ok(BackendKind::OpenAi),
            other => Err(format!("Invalid LLM provider: {}. Must be ollama or openai", other)),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            model: "qwen3-vl".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            timeout_seconds: 60,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// A service that turns a prompt into model text
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    async fn generate(&self, prompt: &PromptSpec) -> InferenceResult<LLMResponse>;

    /// Reachability probe; returns the models the backend reports
    async fn health_check(&self) -> InferenceResult<Vec<String>>;
}

/// Build the backend named by the configuration
pub fn build_backend(config: &BackendConfig) -> InferenceResult<Arc<dyn InferenceBackend>> {
    match config.kind {
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(config)?)),
        BackendKind::OpenAi => Ok(Arc::new(OpenAiBackend::new(config)?)),
    }
}

/// Shared reqwest client with the configured deadline as a safety net
pub(crate) fn http_client(config: &BackendConfig) -> InferenceResult<reqwest::Client> {
    reqwest::Client::builder()
        // Slightly longer than the gateway deadline so the gateway reports the timeout
        .timeout(config.timeout() + Duration::from_secs(5))
        .build()
        .map_err(|e| InferenceError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Parse and normalise a base URL, dropping any trailing slash
pub(crate) fn base_url(endpoint: &str) -> InferenceResult<String> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| InferenceError::InvalidRequest(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(InferenceError::InvalidRequest(format!(
            "Endpoint '{}' must use http or https",
            endpoint
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Turn a non-success response into the matching error
pub(crate) async fn error_from_response(response: reqwest::Response) -> InferenceError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        body.chars().take(500).collect()
    };
    InferenceError::from_status(status, message, retry_after)
}
