//! Anthropic Messages API adapter.
//!
//! Translates the uniform chat shape to and from the Messages API:
//! system turns become the `system` field, responses and SSE events are
//! mapped back to the OpenAI-compatible wire shape the gateway exposes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use crate::{
    api_types::{
        ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta, ModelInfo,
        Role, StreamChunk, TokenUsage,
    },
    streaming::SseDecoder,
};

use super::{ChatStream, Provider, ProviderError, upstream_error};

const API_VERSION: &str = "2023-06-01";

/// The Messages API requires max_tokens; used when the client omits it.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop);
        }
        body
    }
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let response = self
            .authorize(client.post(self.url("/v1/messages")))
            .json(&self.request_body(request, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let message: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let content = message["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = message["stop_reason"].as_str().map(map_stop_reason);
        let prompt_tokens = message["usage"]["input_tokens"].as_i64().unwrap_or(0);
        let completion_tokens = message["usage"]["output_tokens"].as_i64().unwrap_or(0);

        Ok(ChatResponse {
            id: message["id"].as_str().unwrap_or("msg-unknown").to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: message["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason,
            }],
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            x_gateway: None,
        })
    }

    async fn chat_stream(
        &self,
        client: &reqwest::Client,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        let response = self
            .authorize(client.post(self.url("/v1/messages")))
            .json(&self.request_body(request, true))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let model = request.model.clone();
        let mut bytes = response.bytes_stream();
        let (mut tx, rx) = futures::channel::mpsc::channel::<Result<StreamChunk, ProviderError>>(16);

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let created = chrono::Utc::now().timestamp();
            let mut message_id = String::from("msg-stream");
            let mut input_tokens = 0i64;

            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Request(e))).await;
                        return;
                    }
                };

                for event in decoder.feed(&chunk) {
                    let Ok(data) = serde_json::from_str::<serde_json::Value>(&event.data) else {
                        continue;
                    };

                    let kind = event
                        .event
                        .as_deref()
                        .or_else(|| data["type"].as_str())
                        .unwrap_or_default()
                        .to_string();

                    let outgoing = match kind.as_str() {
                        "message_start" => {
                            if let Some(id) = data["message"]["id"].as_str() {
                                message_id = id.to_string();
                            }
                            input_tokens =
                                data["message"]["usage"]["input_tokens"].as_i64().unwrap_or(0);
                            Some(StreamChunk {
                                id: message_id.clone(),
                                object: "chat.completion.chunk".to_string(),
                                created,
                                model: model.clone(),
                                choices: vec![ChunkChoice {
                                    index: 0,
                                    delta: ChunkDelta {
                                        role: Some(Role::Assistant),
                                        content: None,
                                    },
                                    finish_reason: None,
                                }],
                                usage: None,
                            })
                        }
                        "content_block_delta" => data["delta"]["text"].as_str().map(|text| {
                            StreamChunk {
                                id: message_id.clone(),
                                object: "chat.completion.chunk".to_string(),
                                created,
                                model: model.clone(),
                                choices: vec![ChunkChoice {
                                    index: 0,
                                    delta: ChunkDelta {
                                        role: None,
                                        content: Some(text.to_string()),
                                    },
                                    finish_reason: None,
                                }],
                                usage: None,
                            }
                        }),
                        "message_delta" => {
                            let output_tokens =
                                data["usage"]["output_tokens"].as_i64().unwrap_or(0);
                            let finish_reason = data["delta"]["stop_reason"]
                                .as_str()
                                .map(map_stop_reason)
                                .or_else(|| Some("stop".to_string()));
                            Some(StreamChunk {
                                id: message_id.clone(),
                                object: "chat.completion.chunk".to_string(),
                                created,
                                model: model.clone(),
                                choices: vec![ChunkChoice {
                                    index: 0,
                                    delta: ChunkDelta::default(),
                                    finish_reason,
                                }],
                                usage: Some(TokenUsage {
                                    prompt_tokens: input_tokens,
                                    completion_tokens: output_tokens,
                                    total_tokens: input_tokens + output_tokens,
                                }),
                            })
                        }
                        "message_stop" => return,
                        "error" => {
                            let message = data["error"]["message"]
                                .as_str()
                                .unwrap_or("stream error")
                                .to_string();
                            let _ = tx
                                .send(Err(ProviderError::Upstream { status: 500, message }))
                                .await;
                            return;
                        }
                        // ping, content_block_start, content_block_stop
                        _ => None,
                    };

                    if let Some(chunk) = outgoing {
                        if tx.send(Ok(chunk)).await.is_err() {
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
        let response = self.authorize(client.get(self.url("/v1/models"))).send().await?;

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

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "claude-3-5-sonnet".into(),
            messages: vec![
                ChatMessage::system("Be terse."),
                ChatMessage::user("Hello"),
            ],
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn chat_maps_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-3-5-sonnet",
                "system": "Be terse.",
                "max_tokens": DEFAULT_MAX_TOKENS,
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_01",
                "model": "claude-3-5-sonnet",
                "content": [{"type": "text", "text": "Hi."}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("anthropic", server.uri(), "sk-ant-test");
        let client = reqwest::Client::new();

        let response = provider.chat(&client, &request()).await.unwrap();
        assert_eq!(response.id, "msg_01");
        assert_eq!(response.choices[0].message.content, "Hi.");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn stream_maps_event_sequence() {
        let sse = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"usage\":{\"input_tokens\":10}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("anthropic", server.uri(), "sk-ant-test");
        let client = reqwest::Client::new();

        let mut stream = provider.chat_stream(&client, &request()).await.unwrap();
        let mut content = String::new();
        let mut final_usage = None;
        let mut finish_reason = None;
        while let Some(item) = stream.next().await {
            let chunk = item.unwrap();
            if let Some(text) = &chunk.choices[0].delta.content {
                content.push_str(text);
            }
            if let Some(reason) = &chunk.choices[0].finish_reason {
                finish_reason = Some(reason.clone());
            }
            if let Some(usage) = chunk.usage {
                final_usage = Some(usage);
            }
        }

        assert_eq!(content, "Hello");
        assert_eq!(finish_reason.as_deref(), Some("stop"));
        let usage = final_usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_use");
    }
}
