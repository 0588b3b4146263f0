//! LLM provider capability and adapters.
//!
//! Every method receives the shared `reqwest::Client`. The client is built
//! once at startup; reqwest keeps per-host connection pools internally, so
//! each provider endpoint gets its own long-lived, bounded pool.

mod anthropic;
mod echo;
mod openai;

pub use anthropic::AnthropicProvider;
pub use echo::EchoProvider;
pub use openai::OpenAiProvider;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::api_types::{ChatRequest, ChatResponse, ModelInfo, StreamChunk};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("{0}")]
    Internal(String),
}

/// A streaming completion: ordered, finite, cancellable (dropping it
/// closes the upstream socket), with exactly one terminal outcome — the
/// stream ends cleanly or yields one error and stops.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Result of a provider health probe.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProviderHealth {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms,
            error: None,
        }
    }

    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// An external LLM backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used for routing hints, breakers and accounting.
    fn id(&self) -> &str;

    async fn chat(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;

    async fn chat_stream(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError>;

    async fn list_models(&self, client: &reqwest::Client)
    -> Result<Vec<ModelInfo>, ProviderError>;

    /// Probe the backend. The default uses model enumeration as a cheap
    /// connectivity and auth check.
    async fn health_check(&self, client: &reqwest::Client) -> ProviderHealth {
        let start = std::time::Instant::now();
        match self.list_models(client).await {
            Ok(_) => ProviderHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                ProviderHealth::unhealthy(start.elapsed().as_millis() as u64, e.to_string())
            }
        }
    }
}

/// Pull a readable message out of an upstream error response.
pub(crate) async fn upstream_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    // Providers wrap their errors as {"error":{"message":…}}; fall back to
    // the raw body, truncated.
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let mut raw = body;
            raw.truncate(200);
            raw
        });

    ProviderError::Upstream { status, message }
}
