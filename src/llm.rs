use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::utils::error::{AppError, Result};

pub const COMPLETION_SERVICE: &str = "completion";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Produces narrative text from a conversation. A single call, no retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct CompletionClient {
    client: Client,
    config: LlmConfig,
}

impl CompletionClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl NarrativeGenerator for CompletionClient {
    fn name(&self) -> &'static str {
        COMPLETION_SERVICE
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::MissingApiKey {
                service: COMPLETION_SERVICE.to_string(),
            })?;

        tracing::debug!(model = %self.config.model, messages = messages.len(), "requesting completion");

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.config.model,
                messages,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited {
                service: COMPLETION_SERVICE.to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::UnexpectedStatus {
                status: status.as_u16(),
                service: COMPLETION_SERVICE.to_string(),
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::NoData("Completion returned no content".to_string()))
    }
}
