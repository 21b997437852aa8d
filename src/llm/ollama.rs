//! Local Ollama backend through the `ollama-rs` client

use async_trait::async_trait;
use ollama_rs::error::OllamaError;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use tracing::debug;
use url::Url;

use super::{base_url, BackendConfig, BackendKind, InferenceBackend, LLMResponse, PromptSpec};
use crate::errors::{InferenceError, InferenceResult};

const DEFAULT_OLLAMA_PORT: u16 = 11434;

pub struct OllamaBackend {
    ollama: Ollama,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> InferenceResult<Self> {
        let parsed = Url::parse(&base_url(&config.endpoint)?)
            .map_err(|e| InferenceError::InvalidRequest(format!("Invalid Ollama URL: {}", e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| InferenceError::InvalidRequest(format!("No host in Ollama URL '{}'", config.endpoint)))?;
        let port = parsed.port().unwrap_or(DEFAULT_OLLAMA_PORT);

        Ok(Self {
            ollama: Ollama::new(format!("{}://{}", parsed.scheme(), host), port),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn chat_request(&self, prompt: &PromptSpec, model: &str) -> ChatMessageRequest {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage::system(prompt.system.clone()));
        }
        messages.push(ChatMessage::user(prompt.user.clone()));

        let num_predict = i32::try_from(self.max_tokens).unwrap_or(i32::MAX);
        ChatMessageRequest::new(model.to_string(), messages).options(
            ModelOptions::default()
                .temperature(self.temperature)
                .num_predict(num_predict),
        )
    }
}

/// Map client errors onto the gateway's retry classification
///
/// `ollama-rs` hands back the error body of a failed reply without its status,
/// so server replies become `Backend` unless the text names a missing model.
fn map_ollama_error(err: OllamaError) -> InferenceError {
    match err {
        OllamaError::ReqwestError(e) if e.is_timeout() => InferenceError::Timeout { timeout_ms: 0 },
        OllamaError::ReqwestError(e) => match e.status() {
            Some(status) => InferenceError::from_status(status.as_u16(), e.to_string(), None),
            None => InferenceError::Network(e.to_string()),
        },
        OllamaError::JsonError(e) => InferenceError::Decode(format!("Ollama response: {}", e)),
        other => {
            let message = other.to_string();
            if message.to_ascii_lowercase().contains("not found") {
                InferenceError::InvalidRequest(message)
            } else {
                InferenceError::Backend(message)
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    async fn generate(&self, prompt: &PromptSpec) -> InferenceResult<LLMResponse> {
        let model = prompt.model.as_deref().unwrap_or(&self.model);

        debug!(
            "Ollama chat request: model '{}', prompt length {} chars",
            model,
            prompt.system.len() + prompt.user.len()
        );

        let response = self
            .ollama
            .send_chat_messages(self.chat_request(prompt, model))
            .await
            .map_err(map_ollama_error)?;

        let (prompt_tokens, completion_tokens) = match &response.final_data {
            Some(data) => (Some(data.prompt_eval_count as usize), Some(data.eval_count as usize)),
            None => (None, None),
        };
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        };
        let model = if response.model.is_empty() {
            model.to_string()
        } else {
            response.model
        };

        Ok(LLMResponse {
            content: response.message.content,
            model,
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }

    async fn health_check(&self) -> InferenceResult<Vec<String>> {
        let models = self.ollama.list_local_models().await.map_err(map_ollama_error)?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }
}
