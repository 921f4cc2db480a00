//! Generation capability client
//!
//! The language model is an external collaborator: given a prompt, return
//! generated text, fallible and latency-variable. Every core component that
//! calls it catches the failure itself and degrades; nothing here retries.
//! Timeouts are the HTTP client's responsibility.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Error, Debug)]
pub enum LlmError {
    /// The capability is not configured (disabled, or no API key).
    /// Callers always have a defined fallback for this.
    #[error("Language model is not configured")]
    Unavailable,

    /// The provider rejected our credentials
    #[error("Language model rejected credentials: {0}")]
    Auth(String),

    /// Any other provider failure, including malformed structured output
    #[error("Language model request failed: {0}")]
    Provider(String),
}

/// Chat message roles on the wire and in the session log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Opaque text-generation capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one chat completion and return the generated text
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Build a client from configuration.
    ///
    /// A disabled config or a missing API key still yields a client; it
    /// just fails every call with `Unavailable` so callers hit their
    /// fallback paths uniformly.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = if config.enabled {
            match std::env::var(&config.api_key_env) {
                Ok(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
                _ => {
                    tracing::warn!(
                        "LLM enabled but {} is not set; generation is unavailable",
                        config.api_key_env
                    );
                    None
                }
            }
        } else {
            None
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::Unavailable)?;

        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        wire_messages.push(WireMessage {
            role: Role::System.as_str(),
            content: system_prompt,
        });
        for message in messages {
            wire_messages.push(WireMessage {
                role: message.role.as_str(),
                content: &message.content,
            });
        }

        let request = CompletionRequest {
            model: &self.model,
            messages: wire_messages,
            temperature,
            max_tokens,
        };

        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| LlmError::Auth("API key contains invalid characters".to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Auth(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("{}: {}", status, body)));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Provider(format!("Unparseable completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Provider("Completion contained no content".to_string()))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Parse a completion that was requested as structured output.
///
/// The text must be a single well-formed JSON object (a markdown code fence
/// around it is tolerated); anything else is a provider failure.
pub fn parse_json_object(text: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = strip_code_fence(text.trim());

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| LlmError::Provider(format!("Malformed structured output: {}", e)))?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::Provider(
            "Structured output was not a JSON object".to_string(),
        ))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_unconfigured_client_is_unavailable() {
        let config = Config::default();
        let client = OpenAiClient::from_config(&config.llm).unwrap();
        assert!(!client.is_configured());

        let result = client
            .complete("system", &[ChatMessage::user("hi")], 0.3, 100)
            .await;
        assert!(matches!(result, Err(LlmError::Unavailable)));
    }

    #[test]
    fn test_parse_json_object() {
        let value = parse_json_object(r#"{"topics": ["a", "b"]}"#).unwrap();
        assert!(value.get("topics").is_some());
    }

    #[test]
    fn test_parse_json_object_with_fence() {
        let value = parse_json_object("```json\n{\"ok\": true}\n```").unwrap();
        assert_eq!(value["ok"], serde_json::json!(true));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_json_object("[1, 2, 3]").is_err());
        assert!(parse_json_object("not json at all").is_err());
    }

    #[test]
    fn test_role_serialization() {
        let message = ChatMessage::assistant("hello");
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"assistant\""));

        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.role, Role::Assistant);
    }
}
