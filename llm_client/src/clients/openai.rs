//! Upstream client for everything speaking the OpenAI dialect: openai
//! itself, vllm, openrouter, lm-studio and copilot. The only differences
//! between them are the base url and the auth headers.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::format::{wire_format, WireFormat};
use crate::provider::{ProviderAuth, ProviderKind, UpstreamTarget};

use super::types::{
    ChunkDelta, GatewayRequest, GatewayResponse, LLMClient, LLMClientError, RequestKind,
    StreamChunk, TokenUsage,
};

pub struct OpenAICompatClient {
    client: reqwest::Client,
    kind: ProviderKind,
}

impl OpenAICompatClient {
    pub fn new(kind: ProviderKind) -> Self {
        debug_assert!(kind.is_openai_compatible());
        Self {
            client: reqwest::Client::new(),
            kind,
        }
    }

    fn endpoint(&self, target: &UpstreamTarget, kind: RequestKind) -> String {
        let path = match kind {
            RequestKind::Chat => "/chat/completions",
            RequestKind::Embeddings => "/embeddings",
            RequestKind::Completion | RequestKind::Fim => "/completions",
        };
        format!("{}{}", target.base_url(), path)
    }

    fn apply_auth(
        &self,
        mut builder: reqwest::RequestBuilder,
        auth: &ProviderAuth,
    ) -> reqwest::RequestBuilder {
        match auth {
            ProviderAuth::None => {}
            ProviderAuth::ApiKey(key) => {
                // vllm behind azure-style gateways takes the bare key header
                builder = builder.header("api-key", key.clone());
            }
            ProviderAuth::Bearer(token) => {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
        }
        if self.kind == ProviderKind::Copilot {
            builder = builder
                .header("copilot-integration-id", "vscode-chat")
                .header("editor-version", "vscode/1.95.0");
        }
        builder
    }

    fn delta_from_chunk(kind: RequestKind, payload: &Value) -> Option<ChunkDelta> {
        let choice = payload.get("choices")?.get(0)?;
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            return Some(ChunkDelta::Finish {
                reason: Some(reason.to_owned()),
            });
        }
        if kind == RequestKind::Chat {
            let delta = choice.get("delta")?;
            if let Some(call) = delta.get("tool_calls").and_then(Value::as_array).and_then(|c| c.first()) {
                return Some(ChunkDelta::ToolCall {
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    arguments: call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                });
            }
            let text = delta.get("content").and_then(Value::as_str)?;
            Some(ChunkDelta::Text {
                text: text.to_owned(),
            })
        } else {
            let text = choice.get("text").and_then(Value::as_str)?;
            Some(ChunkDelta::Text {
                text: text.to_owned(),
            })
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn stream_completion(
        &self,
        target: &UpstreamTarget,
        request: GatewayRequest,
        sender: UnboundedSender<StreamChunk>,
    ) -> Result<GatewayResponse, LLMClientError> {
        let kind = request.kind();
        if kind == RequestKind::Embeddings {
            return Err(LLMClientError::UnsupportedRequestKind(kind));
        }
        let model = request.model().to_owned();
        let body = wire_format(self.kind).encode_request(&request.set_stream(true));

        let response = self
            .apply_auth(self.client.post(self.endpoint(target, kind)), target.auth())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LLMClientError::AuthRejected);
        }
        if !status.is_success() {
            return Err(LLMClientError::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut event_source = response.bytes_stream().eventsource();
        let mut buffered = String::new();
        let mut finish_reason = None;
        let mut usage = None;
        let mut seq = 0u64;
        while let Some(event) = event_source.next().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = ?err, "upstream stream broke mid flight");
                    break;
                }
            };
            if event.data.trim() == "[DONE]" {
                break;
            }
            let payload: Value = match serde_json::from_str(&event.data) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = ?err, "skipping undecodable upstream chunk");
                    continue;
                }
            };
            if let Some(raw_usage) = payload.get("usage") {
                usage = serde_json::from_value::<TokenUsage>(raw_usage.clone()).ok();
            }
            let Some(delta) = Self::delta_from_chunk(kind, &payload) else {
                continue;
            };
            match &delta {
                ChunkDelta::Text { text } => buffered.push_str(text),
                ChunkDelta::Finish { reason } => finish_reason = reason.clone(),
                _ => {}
            }
            let done = matches!(delta, ChunkDelta::Finish { .. });
            sender
                .send(StreamChunk::new(seq, delta).with_provider_meta(payload))
                .map_err(|_| LLMClientError::ClientDisconnected)?;
            seq += 1;
            if done {
                break;
            }
        }

        let mut response = GatewayResponse::new(buffered, model).with_finish_reason(finish_reason);
        if let Some(usage) = usage {
            response = response.with_usage(usage);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_delta_extracts_content() {
        let payload = json!({
            "choices": [{"index": 0, "delta": {"content": "hel"}, "finish_reason": null}],
        });
        match OpenAICompatClient::delta_from_chunk(RequestKind::Chat, &payload) {
            Some(ChunkDelta::Text { text }) => assert_eq!(text, "hel"),
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn completion_delta_extracts_text() {
        let payload = json!({"choices": [{"index": 0, "text": "abc", "finish_reason": null}]});
        match OpenAICompatClient::delta_from_chunk(RequestKind::Completion, &payload) {
            Some(ChunkDelta::Text { text }) => assert_eq!(text, "abc"),
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn finish_reason_wins_over_empty_delta() {
        let payload = json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        });
        match OpenAICompatClient::delta_from_chunk(RequestKind::Chat, &payload) {
            Some(ChunkDelta::Finish { reason }) => assert_eq!(reason.as_deref(), Some("stop")),
            other => panic!("unexpected delta: {:?}", other),
        }
    }
}
