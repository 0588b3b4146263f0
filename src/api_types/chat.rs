//! OpenAI-compatible chat completion payloads.
//!
//! The same wire shape is returned regardless of which backend served the
//! request; the only gateway-specific addition is the `x_gateway`
//! annotation block, which never originates from a backend.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Message author role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
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

/// Create chat completion request (OpenAI-compatible).
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use for completion.
    #[validate(length(min = 1))]
    pub model: String,

    /// Conversation messages, oldest first.
    #[validate(length(min = 1))]
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature (0.0 to 2.0).
    #[validate(range(min = 0.0, max = 2.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum completion tokens.
    #[validate(range(min = 1))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling probability (0.0 to 1.0).
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Enable server-sent-event streaming.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Deterministic requests (temperature ≤ 0 or absent) are the only ones
    /// eligible for response caching.
    pub fn is_deterministic(&self) -> bool {
        self.temperature.is_none_or(|t| t <= 0.0)
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// A single completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Metadata appended by the gateway to every response it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAnnotation {
    /// Provider that answered, or `"cache"` for cache hits.
    pub provider: String,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub cache_hit: bool,
    pub request_id: String,
    pub trace_id: String,
}

/// Chat completion response (OpenAI-compatible plus `x_gateway`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_gateway: Option<GatewayAnnotation>,
}

/// Incremental content for one streaming choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One frame of a streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    /// Providers that report usage do so on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> ChatRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn minimal_request_parses() {
        let req = request(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}]
        }));
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert!(!req.stream);
        assert!(req.temperature.is_none());
    }

    #[test]
    fn empty_messages_fail_validation() {
        use validator::Validate;
        let req = request(serde_json::json!({"model": "gpt-4", "messages": []}));
        assert!(req.validate().is_err());
    }

    #[test]
    fn determinism_eligibility() {
        let mut req = request(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(req.is_deterministic());
        req.temperature = Some(0.0);
        assert!(req.is_deterministic());
        req.temperature = Some(0.7);
        assert!(!req.is_deterministic());
    }

    #[test]
    fn response_round_trip_preserves_annotation() {
        let response = ChatResponse {
            id: "chatcmpl-1".into(),
            object: "chat.completion".into(),
            created: 1_700_000_000,
            model: "gpt-4".into(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant("Hi there"),
                finish_reason: Some("stop".into()),
            }],
            usage: TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            },
            x_gateway: Some(GatewayAnnotation {
                provider: "openai".into(),
                latency_ms: 120,
                cost_usd: 0.0003,
                cache_hit: false,
                request_id: "req-1".into(),
                trace_id: "trace-1".into(),
            }),
        };

        let json = serde_json::to_string(&response).unwrap();
        let back: ChatResponse = serde_json::from_str(&json).unwrap();
        let annotation = back.x_gateway.unwrap();
        assert_eq!(annotation.provider, "openai");
        assert!(!annotation.cache_hit);
    }

    #[test]
    fn backend_response_without_annotation_parses() {
        // Backends never emit x_gateway; the field must be optional on read.
        let json = serde_json::json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "ok"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        });
        let response: ChatResponse = serde_json::from_value(json).unwrap();
        assert!(response.x_gateway.is_none());
    }
}
