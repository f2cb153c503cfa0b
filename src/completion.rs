//! Text-completion backend abstraction and the OpenAI implementation.
//!
//! Every model call in the system goes through the [`CompletionBackend`]
//! trait: a chat-style request with one system message and one user message
//! (text, optionally combined with embedded images as data-URIs), returning
//! the raw text of the first choice.
//!
//! Model output is treated as untrusted: callers parse it defensively and
//! either fall back to a deterministic default (naming, folder resolution)
//! or fail the sub-operation (canonical-update extraction). No call is
//! retried; a user-initiated re-submission is the only retry.
//!
//! # Decoding modes
//!
//! - Naming and classification: `temperature = 0` and a small token budget,
//!   so the same input produces the same label.
//! - Summarization: default temperature, larger token budget.
//! - Structured extraction: `response_format = json_object`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

use crate::config::CompletionConfig;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// One part of the user message.
#[derive(Debug, Clone)]
pub enum UserPart {
    Text(String),
    /// A `data:<mime>;base64,...` URI for an embedded image.
    ImageDataUri(String),
}

/// A single chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: Vec<UserPart>,
    /// `Some(0.0)` for deterministic decoding; `None` leaves the backend default.
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    /// Request a JSON-object response for structured extraction.
    pub json_object: bool,
}

impl CompletionRequest {
    /// A deterministic, text-only request (naming and classification tasks).
    pub fn deterministic(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: vec![UserPart::Text(user.into())],
            temperature: Some(0.0),
            max_tokens,
            json_object: false,
        }
    }
}

/// A chat-completion backend.
///
/// The OpenAI implementation is [`OpenAiBackend`]; tests substitute mocks.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Perform one completion call and return the raw assistant text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Encode raw bytes as a `data:` URI suitable for an image message part.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime_type, encoded)
}

// ============ OpenAI backend ============

/// Calls the OpenAI chat completions API.
///
/// Requires `OPENAI_API_KEY` in the environment; the key is read per call so
/// a missing credential degrades the individual operation instead of
/// aborting startup.
pub struct OpenAiBackend {
    config: CompletionConfig,
}

impl OpenAiBackend {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        if !self.config.is_enabled() {
            bail!("Completion provider is disabled");
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let user_content = build_user_content(&request.user);

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": user_content },
            ],
            "max_tokens": request.max_tokens,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if request.json_object {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let resp = client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!(
                "Completion API error {}: {}",
                status,
                body_text.chars().take(500).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;
        extract_message_content(&json)
    }
}

/// Build the user-message `content` value: a bare string for text-only
/// requests, or the multi-part array form when images are attached.
fn build_user_content(parts: &[UserPart]) -> serde_json::Value {
    let only_text = parts
        .iter()
        .all(|p| matches!(p, UserPart::Text(_)));

    if only_text {
        let text: Vec<&str> = parts
            .iter()
            .map(|p| match p {
                UserPart::Text(t) => t.as_str(),
                UserPart::ImageDataUri(_) => unreachable!(),
            })
            .collect();
        return serde_json::Value::String(text.join("\n"));
    }

    let items: Vec<serde_json::Value> = parts
        .iter()
        .map(|p| match p {
            UserPart::Text(t) => serde_json::json!({ "type": "text", "text": t }),
            UserPart::ImageDataUri(uri) => serde_json::json!({
                "type": "image_url",
                "image_url": { "url": uri },
            }),
        })
        .collect();
    serde_json::Value::Array(items)
}

/// Pull `choices[0].message.content` out of a chat completion response.
fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_encodes_mime_and_payload() {
        let uri = data_uri("image/png", b"abc");
        assert_eq!(uri, "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_text_only_content_is_plain_string() {
        let content = build_user_content(&[UserPart::Text("hello".to_string())]);
        assert_eq!(content, serde_json::Value::String("hello".to_string()));
    }

    #[test]
    fn test_mixed_content_is_part_array() {
        let content = build_user_content(&[
            UserPart::Text("describe".to_string()),
            UserPart::ImageDataUri("data:image/png;base64,YWJj".to_string()),
        ]);
        let parts = content.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_extract_message_content() {
        let json = serde_json::json!({
            "choices": [ { "message": { "content": "a label" } } ]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "a label");
    }

    #[test]
    fn test_extract_message_content_missing() {
        let json = serde_json::json!({ "choices": [] });
        assert!(extract_message_content(&json).is_err());
    }
}
