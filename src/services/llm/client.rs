//! LLM Client - HTTP client for OpenAI-compatible APIs
//!
//! Uses reqwest to call chat/completions endpoints. Compatible with
//! DashScope/Qwen, ModelScope and other OpenAI-compatible providers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

use super::LlmError;

/// Minimal chat interface the pipeline depends on; tests implement it
/// with scripted responses.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// One chat-completion round trip; returns the raw assistant text.
    async fn chat(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

/// Reqwest-backed `ChatApi` implementation.
pub struct LlmClient {
    http_client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::ApiError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, config })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ChatApi for LlmClient {
    async fn chat(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage { role: "system".to_string(), content: system.to_string() });
        }
        messages.push(ChatMessage { role: "user".to_string(), content: user.to_string() });

        let chat_request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        tracing::debug!("Calling LLM API: {} with model {}", url, self.config.model);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_seconds)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        if let Some(usage) = &chat_response.usage {
            tracing::debug!(
                "LLM usage: {} prompt tokens, {} completion tokens",
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

        Ok(content.trim().to_string())
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}
