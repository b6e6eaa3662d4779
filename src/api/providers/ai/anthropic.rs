//! Anthropic API provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

use super::{ChatMessage, ChatRole, LlmProvider};
use crate::api::error::ApiError;
use crate::config::LlmConfig;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const PROVIDER_NAME: &str = "anthropic";

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given API key
    pub fn new(api_key: impl Into<String>, llm: &LlmConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent("foreman/0.1.0")
            .build()
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            client,
            base_url: ANTHROPIC_API_BASE.to_string(),
        })
    }

    /// Create provider from the FOREMAN_ANTHROPIC_API_KEY environment variable
    pub fn from_env(llm: &LlmConfig) -> Result<Option<Self>, ApiError> {
        match env::var("FOREMAN_ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Some(Self::new(key, llm)?)),
            _ => Ok(None),
        }
    }

    /// Create provider with a custom base URL (for testing)
    #[cfg(test)]
    pub fn new_with_base_url(
        api_key: impl Into<String>,
        llm: &LlmConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let mut provider = Self::new(api_key, llm)?;
        provider.base_url = base_url.into();
        Ok(provider)
    }

    /// Split out system messages: the Messages API takes them as a top-level
    /// parameter, not as conversation turns.
    fn build_request(&self, messages: &[ChatMessage]) -> MessagesRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let turns: Vec<ApiMessage> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: turns,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        let url = format!("{}/v1/messages", self.base_url);
        let request_body = self.build_request(messages);

        debug!(model = %self.model, turns = request_body.messages.len(), "generating");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return match status.as_u16() {
                401 => Err(ApiError::unauthorized(PROVIDER_NAME)),
                403 => Err(ApiError::forbidden(PROVIDER_NAME)),
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse().ok());
                    Err(ApiError::rate_limited(PROVIDER_NAME, retry_after))
                }
                code => {
                    let body = response.text().await.unwrap_or_default();
                    Err(ApiError::http(PROVIDER_NAME, code, body))
                }
            };
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ApiError::http(PROVIDER_NAME, 0, format!("Parse error: {}", e)))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(ApiError::http(
                PROVIDER_NAME,
                0,
                "No text content in response".to_string(),
            ));
        }

        Ok(text)
    }
}
