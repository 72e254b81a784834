//! llama.cpp server client. Chat goes through the server's OpenAI-compatible
//! surface; completions and FIM hit the native `/completion` endpoint so the
//! prompt (markers included) reaches the model verbatim.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::provider::{ProviderAuth, ProviderKind, UpstreamTarget};

use super::openai::OpenAICompatClient;
use super::types::{
    GatewayRequest, GatewayResponse, LLMClient, LLMClientError, RequestKind, StreamChunk,
    TokenUsage,
};

#[derive(Debug, Deserialize)]
struct LlamaCppChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    tokens_predicted: Option<u64>,
    #[serde(default)]
    tokens_evaluated: Option<u64>,
}

pub struct LlamaCppClient {
    client: reqwest::Client,
    chat_fallback: OpenAICompatClient,
}

impl LlamaCppClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            chat_fallback: OpenAICompatClient::new(ProviderKind::Vllm),
        }
    }

    fn completion_endpoint(&self, target: &UpstreamTarget) -> String {
        format!("{}/completion", target.base_url())
    }
}

impl Default for LlamaCppClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for LlamaCppClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LlamaCpp
    }

    async fn stream_completion(
        &self,
        target: &UpstreamTarget,
        request: GatewayRequest,
        sender: UnboundedSender<StreamChunk>,
    ) -> Result<GatewayResponse, LLMClientError> {
        let kind = request.kind();
        match kind {
            RequestKind::Chat => {
                // the server exposes /v1/chat/completions alongside /completion
                let chat_target = UpstreamTarget::new(
                    format!("{}/v1", target.base_url()),
                    target.auth().clone(),
                );
                return self
                    .chat_fallback
                    .stream_completion(&chat_target, request, sender)
                    .await;
            }
            RequestKind::Embeddings => {
                return Err(LLMClientError::UnsupportedRequestKind(kind))
            }
            RequestKind::Completion | RequestKind::Fim => {}
        }

        let model = request.model().to_owned();
        let prompt = request
            .messages()
            .iter()
            .map(|message| message.text())
            .collect::<Vec<_>>()
            .join("\n");
        let mut body = json!({
            "prompt": prompt,
            "stream": true,
        });
        if let Some(temperature) = request.temperature() {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens() {
            body["n_predict"] = json!(max_tokens);
        }
        if let Some(stop) = request.stop() {
            body["stop"] = json!(stop);
        }

        let mut builder = self.client.post(self.completion_endpoint(target));
        if let ProviderAuth::Bearer(token) | ProviderAuth::ApiKey(token) = target.auth() {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let response = builder.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LLMClientError::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut event_source = response.bytes_stream().eventsource();
        let mut buffered = String::new();
        let mut usage = TokenUsage::default();
        let mut seq = 0u64;
        while let Some(Ok(event)) = event_source.next().await {
            let parsed: LlamaCppChunk = match serde_json::from_str(&event.data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = ?err, "skipping undecodable llama.cpp chunk");
                    continue;
                }
            };
            if !parsed.content.is_empty() {
                buffered.push_str(&parsed.content);
                sender
                    .send(StreamChunk::text(seq, parsed.content))
                    .map_err(|_| LLMClientError::ClientDisconnected)?;
                seq += 1;
            }
            if parsed.stop {
                usage.prompt_tokens = parsed.tokens_evaluated.unwrap_or(0);
                usage.completion_tokens = parsed.tokens_predicted.unwrap_or(0);
                sender
                    .send(StreamChunk::finish(seq, Some("stop".to_owned())))
                    .map_err(|_| LLMClientError::ClientDisconnected)?;
                break;
            }
        }

        Ok(GatewayResponse::new(buffered, model)
            .with_finish_reason(Some("stop".to_owned()))
            .with_usage(usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_chunk_decodes_stop_flag() {
        let chunk: LlamaCppChunk = serde_json::from_str(
            r#"{"content":"}","stop":true,"tokens_predicted":7,"tokens_evaluated":120}"#,
        )
        .expect("decode");
        assert!(chunk.stop);
        assert_eq!(chunk.tokens_predicted, Some(7));
    }
}
