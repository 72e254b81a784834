//! Ollama client. The wire is NDJSON, one object per line, which may land
//! split across transport chunks, so reads are line-buffered.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::format::{wire_format, WireFormat};
use crate::provider::{ProviderKind, UpstreamTarget};

use super::types::{
    GatewayRequest, GatewayResponse, LLMClient, LLMClientError, RequestKind, StreamChunk,
    TokenUsage,
};

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaLine {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, target: &UpstreamTarget, kind: RequestKind) -> String {
        match kind {
            RequestKind::Chat => format!("{}/api/chat", target.base_url()),
            _ => format!("{}/api/generate", target.base_url()),
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
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
        let body = wire_format(ProviderKind::Ollama).encode_request(&request.set_stream(true));

        let response = self
            .client
            .post(self.endpoint(target, kind))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LLMClientError::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut buffered = String::new();
        let mut finish_reason = None;
        let mut usage = TokenUsage::default();
        let mut seq = 0u64;
        let mut done = false;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            line_buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = line_buffer.find('\n') {
                let line: String = line_buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed: OllamaLine = match serde_json::from_str(line) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = ?err, "skipping undecodable ollama line");
                        continue;
                    }
                };
                if let Some(error) = parsed.error {
                    return Err(LLMClientError::UpstreamStatus {
                        status: 502,
                        body: error,
                    });
                }
                let text = parsed
                    .message
                    .map(|message| message.content)
                    .or(parsed.response)
                    .unwrap_or_default();
                if !text.is_empty() {
                    buffered.push_str(&text);
                    sender
                        .send(StreamChunk::text(seq, text))
                        .map_err(|_| LLMClientError::ClientDisconnected)?;
                    seq += 1;
                }
                if parsed.done {
                    finish_reason = parsed.done_reason;
                    usage.prompt_tokens = parsed.prompt_eval_count.unwrap_or(0);
                    usage.completion_tokens = parsed.eval_count.unwrap_or(0);
                    sender
                        .send(StreamChunk::finish(seq, finish_reason.clone()))
                        .map_err(|_| LLMClientError::ClientDisconnected)?;
                    done = true;
                    break 'outer;
                }
            }
        }

        if !done && buffered.is_empty() {
            return Err(LLMClientError::FailedToGetResponse);
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
    fn chat_line_and_generate_line_both_decode() {
        let chat: OllamaLine = serde_json::from_str(
            r#"{"model":"q","message":{"role":"assistant","content":"hi"},"done":false}"#,
        )
        .expect("decode");
        assert_eq!(chat.message.map(|m| m.content).as_deref(), Some("hi"));

        let generate: OllamaLine =
            serde_json::from_str(r#"{"model":"q","response":"there","done":false}"#)
                .expect("decode");
        assert_eq!(generate.response.as_deref(), Some("there"));
    }

    #[test]
    fn final_line_carries_counts() {
        let line: OllamaLine = serde_json::from_str(
            r#"{"model":"q","response":"","done":true,"done_reason":"stop","prompt_eval_count":5,"eval_count":9}"#,
        )
        .expect("decode");
        assert!(line.done);
        assert_eq!(line.eval_count, Some(9));
    }
}
