//! Chat-completion provider trait — the HTTP seam of the dispatcher.
//!
//! A provider performs exactly one HTTP call and hands back the raw
//! status and body. It does not retry, classify, or parse; the
//! dispatcher owns all of that so every attempt goes through the same
//! accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EndpointConfig, SamplingParams};
use crate::error::TransportError;

pub mod openai;

// ── Wire Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "user" | "assistant" | "system"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Request body for `POST {url}`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl CompletionRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>, sampling: &SamplingParams) -> Self {
        Self {
            model: model.to_string(),
            messages,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
        }
    }
}

/// Raw HTTP result of one attempt.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Content extracted from a well-formed 2xx body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<serde_json::Value>,
    /// The upstream body exactly as received, passed through by the proxy.
    pub body: String,
}

/// Extract `choices[0].message.content`. `Err` carries a short reason.
pub fn parse_completion(body: &str) -> Result<ParsedCompletion, String> {
    let raw: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("body is not JSON: {}", e))?;

    let choice = raw["choices"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| "no choices in response".to_string())?;

    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| "choice has no message content".to_string())?
        .to_string();

    Ok(ParsedCompletion {
        content,
        model: raw["model"].as_str().map(str::to_string),
        usage: raw.get("usage").filter(|u| !u.is_null()).cloned(),
        body: body.to_string(),
    })
}

// ── Provider Trait ──────────────────────────────────────────────────

#[async_trait]
pub trait ChatCompletionProvider: Send + Sync {
    /// Human-readable provider name, recorded as `api_name`.
    fn name(&self) -> &str;

    /// Send one completion request. `Err` means no HTTP response arrived.
    async fn send(
        &self,
        endpoint: &EndpointConfig,
        req: &CompletionRequest,
    ) -> Result<ProviderReply, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}],
                       "model":"gpt-4o-mini","usage":{"total_tokens":12}}"#;
        let parsed = parse_completion(body).unwrap();
        assert_eq!(parsed.content, "hi there");
        assert_eq!(parsed.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(parsed.usage.unwrap()["total_tokens"], 12);
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn test_parse_rejects_empty_object() {
        assert!(parse_completion("{}").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(err.contains("no choices"));
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        assert!(parse_completion(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).is_err());
        assert!(parse_completion(r#"{"choices":[{"message":{"content":null}}]}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_completion("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn test_request_serializes_sampling_flat() {
        let req = CompletionRequest::new(
            "m",
            vec![ChatMessage::user("hello")],
            &SamplingParams::default(),
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["max_tokens"], 1024);
        assert!(v.get("top_p").is_some());
        assert!(v.get("presence_penalty").is_some());
    }
}
