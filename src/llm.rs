//! Language-model adapter: chat completion and text embedding.
//!
//! Defines the [`LanguageModel`] trait and concrete implementations:
//! - **[`DisabledModel`]** — returns errors; used when no provider is configured.
//! - **[`OpenAiModel`]** — calls an OpenAI-compatible API with retry and backoff.
//!
//! # Retry Strategy
//!
//! Transient errors are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{AppError, Result};

/// One turn in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: String,
    pub content: String,
}

impl ModelMessage {
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
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Interface to the managed generative-AI service.
///
/// Object-safe so the orchestrator and tests can swap implementations.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke_chat(
        &self,
        messages: &[ModelMessage],
        opts: ChatOptions,
    ) -> Result<ChatCompletion>;

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// Create the appropriate [`LanguageModel`] based on configuration.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        other => Err(AppError::Validation(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

// ============ Disabled model ============

/// A no-op model that always fails. Used when no provider is configured.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    async fn invoke_chat(
        &self,
        _messages: &[ModelMessage],
        _opts: ChatOptions,
    ) -> Result<ChatCompletion> {
        Err(AppError::upstream("model", "language model provider is disabled"))
    }

    async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::upstream("model", "language model provider is disabled"))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

// ============ OpenAI-compatible model ============

/// Model adapter for an OpenAI-compatible API.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL is
/// configurable so local gateways and compatible providers work too.
pub struct OpenAiModel {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AppError::upstream("model", "OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::upstream("model", e))?;

        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// POST a JSON body with retry on transient failures, returning the
    /// parsed response body.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let mut last_err: Option<AppError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| AppError::upstream("model", e));
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(AppError::upstream(
                            "model",
                            format!("API error {}: {}", status, body_text),
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(AppError::upstream(
                        "model",
                        format!("API error {}: {}", status, body_text),
                    ));
                }
                Err(e) => {
                    last_err = Some(AppError::upstream("model", e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| AppError::upstream("model", "request failed after retries")))
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn invoke_chat(
        &self,
        messages: &[ModelMessage],
        opts: ChatOptions,
    ) -> Result<ChatCompletion> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
        });

        let json = self.post_with_retry("chat/completions", &body).await?;
        parse_chat_response(&json)
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": text,
        });

        let json = self.post_with_retry("embeddings", &body).await?;
        let embedding = parse_embedding_response(&json)?;

        if embedding.len() != self.config.dims {
            return Err(AppError::upstream(
                "model",
                format!(
                    "embedding has {} dims, expected {}",
                    embedding.len(),
                    self.config.dims
                ),
            ));
        }
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Extract content and token usage from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<ChatCompletion> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| AppError::upstream("model", "invalid chat response: missing content"))?
        .to_string();

    let usage = TokenUsage {
        input_tokens: json
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        output_tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    };

    Ok(ChatCompletion { content, usage })
}

/// Extract the first embedding vector from an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .pointer("/data/0/embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| AppError::upstream("model", "invalid embeddings response: missing embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Noted."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let completion = parse_chat_response(&json).unwrap();
        assert_eq!(completion.content, "Noted.");
        assert_eq!(completion.usage.input_tokens, 12);
        assert_eq!(completion.usage.total(), 15);
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&json).is_err());
    }

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, 0.2, 0.3]}]
        });
        let vec = parse_embedding_response(&json).unwrap();
        assert_eq!(vec.len(), 3);
        assert!((vec[1] - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_disabled_model_always_errors() {
        let model = DisabledModel;
        let result = model
            .invoke_chat(
                &[ModelMessage::user("hi")],
                ChatOptions {
                    temperature: 0.7,
                    max_tokens: 100,
                },
            )
            .await;
        assert!(result.is_err());
        assert!(model.generate_embedding("hi").await.is_err());
    }
}
