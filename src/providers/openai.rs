//! OpenAI-compatible provider adapter.
//!
//! Serves both the hosted OpenAI API and any OpenAI-compatible local
//! inference server (vLLM, llama.cpp server, …) — the only differences
//! are the base URL and whether a credential is attached.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use crate::{
    api_types::{ChatRequest, ChatResponse, ModelInfo, StreamChunk},
    streaming::{DONE_MARKER, SseDecoder},
};

use super::{ChatStream, Provider, ProviderError, upstream_error};

pub struct OpenAiProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }
        if stream {
            // Ask for the usage-bearing final chunk so streamed requests
            // can be accounted.
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let response = self
            .authorize(client.post(self.url("/chat/completions")))
            .json(&self.request_body(request, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn chat_stream(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        let response = self
            .authorize(client.post(self.url("/chat/completions")))
            .json(&self.request_body(request, true))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let mut bytes = response.bytes_stream();
        let (mut tx, rx) = futures::channel::mpsc::channel::<Result<StreamChunk, ProviderError>>(16);

        // The forwarder owns the HTTP response; when the consumer drops
        // the stream, sends fail and the task exits, closing the socket.
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Request(e))).await;
                        return;
                    }
                };

                for event in decoder.feed(&chunk) {
                    if event.data.trim() == DONE_MARKER {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(parsed) => {
                            if tx.send(Ok(parsed)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(ProviderError::Decode(e.to_string()))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(rx))
    }

    async fn list_models(
        &self,
        client: &reqwest::Client,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self.authorize(client.get(self.url("/models"))).send().await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let listing: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let models = listing["data"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry["id"].as_str())
                    .map(|id| ModelInfo::new(id, &self.id))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}
