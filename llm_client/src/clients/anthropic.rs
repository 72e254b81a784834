use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::format::{wire_format, WireFormat};
use crate::provider::{ProviderAuth, ProviderKind, UpstreamTarget};

use super::types::{
    ChunkDelta, GatewayRequest, GatewayResponse, LLMClient, LLMClientError, RequestKind,
    StreamChunk, TokenUsage,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageData },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        #[allow(dead_code)]
        index: u32,
        content_block: ContentBlock,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        #[allow(dead_code)]
        index: u32,
        delta: ContentBlockDelta,
    },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaData,
        usage: Usage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: ErrorData },
}

#[derive(Debug, Deserialize)]
struct MessageData {
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaData {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    message: String,
}

pub struct AnthropicClient {
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn chat_endpoint(&self, target: &UpstreamTarget) -> String {
        format!("{}/v1/messages", target.base_url())
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn stream_completion(
        &self,
        target: &UpstreamTarget,
        request: GatewayRequest,
        sender: UnboundedSender<StreamChunk>,
    ) -> Result<GatewayResponse, LLMClientError> {
        if request.kind() == RequestKind::Embeddings {
            return Err(LLMClientError::UnsupportedRequestKind(request.kind()));
        }
        let model = request.model().to_owned();
        let body =
            wire_format(ProviderKind::Anthropic).encode_request(&request.set_stream(true));

        let mut builder = self
            .client
            .post(self.chat_endpoint(target))
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json");
        match target.auth() {
            ProviderAuth::None => {}
            ProviderAuth::ApiKey(key) => builder = builder.header("x-api-key", key.clone()),
            ProviderAuth::Bearer(token) => {
                builder = builder.header("authorization", format!("Bearer {}", token))
            }
        }

        let response = builder.json(&body).send().await?;
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
        let mut usage = TokenUsage::default();
        let mut seq = 0u64;
        while let Some(Ok(event)) = event_source.next().await {
            let parsed = match serde_json::from_str::<AnthropicEvent>(&event.data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = ?err, "skipping undecodable anthropic event");
                    continue;
                }
            };
            match parsed {
                AnthropicEvent::MessageStart { message } => {
                    usage.prompt_tokens = message.usage.input_tokens;
                }
                AnthropicEvent::ContentBlockStart { content_block, .. } => {
                    if !content_block.text.is_empty() {
                        buffered.push_str(&content_block.text);
                        sender
                            .send(StreamChunk::text(seq, content_block.text))
                            .map_err(|_| LLMClientError::ClientDisconnected)?;
                        seq += 1;
                    }
                }
                AnthropicEvent::ContentBlockDelta { delta, .. } => {
                    buffered.push_str(&delta.text);
                    sender
                        .send(StreamChunk::text(seq, delta.text))
                        .map_err(|_| LLMClientError::ClientDisconnected)?;
                    seq += 1;
                }
                AnthropicEvent::MessageDelta { delta, usage: u } => {
                    finish_reason = delta.stop_reason;
                    usage.completion_tokens = u.output_tokens;
                }
                AnthropicEvent::MessageStop => {
                    sender
                        .send(StreamChunk::finish(seq, finish_reason.clone()))
                        .map_err(|_| LLMClientError::ClientDisconnected)?;
                    break;
                }
                AnthropicEvent::Error { error } => {
                    sender
                        .send(StreamChunk::new(
                            seq,
                            ChunkDelta::Error {
                                message: error.message.clone(),
                            },
                        ))
                        .map_err(|_| LLMClientError::ClientDisconnected)?;
                    return Err(LLMClientError::UpstreamStatus {
                        status: 502,
                        body: error.message,
                    });
                }
                AnthropicEvent::Ping | AnthropicEvent::ContentBlockStop { .. } => {}
            }
        }

        Ok(GatewayResponse::new(buffered, model)
            .with_finish_reason(finish_reason)
            .with_usage(usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_decoding_matches_wire_tags() {
        let event = serde_json::from_str::<AnthropicEvent>(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .expect("decode");
        match event {
            AnthropicEvent::ContentBlockDelta { delta, .. } => assert_eq!(delta.text, "hi"),
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn stop_reason_rides_message_delta() {
        let event = serde_json::from_str::<AnthropicEvent>(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":12}}"#,
        )
        .expect("decode");
        match event {
            AnthropicEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(usage.output_tokens, 12);
            }
            other => panic!("wrong event: {:?}", other),
        }
    }
}
