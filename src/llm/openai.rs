//! Hosted OpenAI-compatible chat completions backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{base_url, error_from_response, http_client, BackendConfig, BackendKind, InferenceBackend, LLMResponse, PromptSpec};
use crate::errors::{InferenceError, InferenceResult};

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> InferenceResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InferenceError::Authentication("OPENAI_API_KEY is not set".to_string()))?;

        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(&config.endpoint)?,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct Response {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
    total_tokens: Option<usize>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    async fn generate(&self, prompt: &PromptSpec) -> InferenceResult<LLMResponse> {
        let model = prompt.model.as_deref().unwrap_or(&self.model);
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(Message {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &prompt.user,
        });

        let request = Request {
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages,
        };

        debug!("OpenAI chat completion request: model '{}'", model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(format!("OpenAI chat response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Decode("OpenAI response contained no choices".to_string()))?;

        let usage = body.usage;
        Ok(LLMResponse {
            content,
            model: body.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
            total_tokens: usage.as_ref().and_then(|u| u.total_tokens),
        })
    }

    async fn health_check(&self) -> InferenceResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let models: ModelList = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(format!("OpenAI models response: {}", e)))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}
