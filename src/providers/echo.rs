//! Deterministic in-process provider for development and tests.
//!
//! Answers every chat with a canned transformation of the last user
//! message, counts its calls, and can be scripted to fail, which makes
//! fallback and breaker behavior observable without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::SinkExt;

use crate::api_types::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta, ModelInfo, Role,
    StreamChunk, TokenUsage,
};

use super::{ChatStream, Provider, ProviderError, ProviderHealth};

pub struct EchoProvider {
    id: String,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl EchoProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of chat calls (streaming included) this provider received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(request: &ChatRequest) -> String {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        format!("echo: {last_user}")
    }

    fn usage_for(request: &ChatRequest, reply: &str) -> TokenUsage {
        // Whitespace tokens are a stand-in for a real tokenizer; good
        // enough for deterministic accounting in tests.
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as i64)
            .sum::<i64>()
            .max(1);
        let completion_tokens = reply.split_whitespace().count() as i64;
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    fn record_call(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Upstream {
                status: 500,
                message: format!("provider '{}' is scripted to fail", self.id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        _client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        self.record_call()?;

        let reply = Self::reply_for(request);
        let usage = Self::usage_for(request, &reply);

        Ok(ChatResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: request.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(reply),
                finish_reason: Some("stop".to_string()),
            }],
            usage,
            x_gateway: None,
        })
    }

    async fn chat_stream(
        &self,
        _client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        self.record_call()?;

        let reply = Self::reply_for(request);
        let usage = Self::usage_for(request, &reply);
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        let created = chrono::Utc::now().timestamp();
        let model = request.model.clone();

        let words: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let (mut tx, rx) = futures::channel::mpsc::channel::<Result<StreamChunk, ProviderError>>(16);

        tokio::spawn(async move {
            for word in words {
                let chunk = StreamChunk {
                    id: id.clone(),
                    object: "chat.completion.chunk".to_string(),
                    created,
                    model: model.clone(),
                    choices: vec![ChunkChoice {
                        index: 0,
                        delta: ChunkDelta {
                            role: None,
                            content: Some(word),
                        },
                        finish_reason: None,
                    }],
                    usage: None,
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }

            let terminal = StreamChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created,
                model: model.clone(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: ChunkDelta::default(),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Some(usage),
            };
            let _ = tx.send(Ok(terminal)).await;
        });

        Ok(Box::pin(rx))
    }

    async fn list_models(
        &self,
        _client: &reqwest::Client,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Upstream {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        Ok(vec![ModelInfo::new("echo-1", &self.id)])
    }

    async fn health_check(&self, _client: &reqwest::Client) -> ProviderHealth {
        if self.failing.load(Ordering::SeqCst) {
            ProviderHealth::unhealthy(0, "scripted failure")
        } else {
            ProviderHealth::healthy(0)
        }
    }
}
