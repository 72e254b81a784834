//! The ollama dialect: `/api/chat` and `/api/generate`, NDJSON streaming.

use serde_json::{json, Map, Value};

use crate::clients::types::{
    ChunkDelta, GatewayMessage, GatewayRequest, GatewayResponse, MessageRole, RequestKind,
    StreamChunk,
};
use crate::fim;

use super::{WireError, WireFormat};

const CONSUMED_KEYS: &[&str] = &["model", "messages", "prompt", "stream", "options"];

pub struct OllamaFormat;

impl OllamaFormat {
    fn apply_options(mut request: GatewayRequest, body: &Value) -> GatewayRequest {
        if let Some(options) = body.get("options") {
            if let Some(temperature) = options.get("temperature").and_then(Value::as_f64) {
                request = request.set_temperature(temperature as f32);
            }
            if let Some(num_predict) = options.get("num_predict").and_then(Value::as_u64) {
                request = request.set_max_tokens(num_predict);
            }
            if let Some(stops) = options.get("stop").and_then(Value::as_array) {
                request = request.set_stop(
                    stops
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect(),
                );
            }
        }
        request
    }

    fn line(value: Value) -> String {
        format!("{}\n", value)
    }
}

impl WireFormat for OllamaFormat {
    fn decode_request(
        &self,
        kind: RequestKind,
        body: &Value,
    ) -> Result<GatewayRequest, WireError> {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("model"))?
            .to_owned();
        let passthrough: Map<String, Value> = body
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(key, _)| !CONSUMED_KEYS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut request = if let Some(raw_messages) = body.get("messages").and_then(Value::as_array)
        {
            let mut system = None;
            let mut messages = Vec::new();
            for raw in raw_messages {
                let role_str = raw
                    .get("role")
                    .and_then(Value::as_str)
                    .ok_or(WireError::MissingField("role"))?;
                let role = MessageRole::parse(role_str).ok_or_else(|| {
                    WireError::InvalidShape(format!("unknown role `{}`", role_str))
                })?;
                let content = raw
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if role == MessageRole::System && system.is_none() && messages.is_empty() {
                    system = Some(content.to_owned());
                } else {
                    messages.push(GatewayMessage::new(
                        role,
                        vec![crate::clients::types::MessagePart::text(content)],
                    ));
                }
            }
            let mut request = GatewayRequest::new(RequestKind::Chat, model, messages);
            if let Some(system) = system {
                request = request.set_system(system);
            }
            request
        } else {
            let prompt = body
                .get("prompt")
                .and_then(Value::as_str)
                .ok_or(WireError::MissingField("prompt"))?;
            let kind = if kind == RequestKind::Fim || fim::contains_fim_markers(prompt) {
                RequestKind::Fim
            } else {
                RequestKind::Completion
            };
            GatewayRequest::new(kind, model, vec![GatewayMessage::user(prompt)])
        };

        request = request.set_raw_provider_fields(passthrough);
        // ollama streams unless told otherwise
        request = request.set_stream(
            body.get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        );
        Ok(Self::apply_options(request, body))
    }

    fn encode_request(&self, request: &GatewayRequest) -> Value {
        let mut body = request.raw_provider_fields().clone();
        body.insert("model".to_owned(), json!(request.model()));
        if request.kind() == RequestKind::Chat {
            let mut messages = Vec::new();
            if let Some(system) = request.system() {
                messages.push(json!({"role": "system", "content": system}));
            }
            for message in request.messages() {
                messages.push(json!({
                    "role": message.role().as_str(),
                    "content": message.text(),
                }));
            }
            body.insert("messages".to_owned(), Value::Array(messages));
        } else {
            let prompt = request
                .messages()
                .iter()
                .map(|message| message.text())
                .collect::<Vec<_>>()
                .join("\n");
            body.insert("prompt".to_owned(), json!(prompt));
            // raw prompts must not be re-templated, FIM markers included
            body.insert("raw".to_owned(), json!(request.kind() == RequestKind::Fim));
        }
        body.insert("stream".to_owned(), json!(request.stream()));
        let mut options = Map::new();
        if let Some(temperature) = request.temperature() {
            options.insert("temperature".to_owned(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens() {
            options.insert("num_predict".to_owned(), json!(max_tokens));
        }
        if let Some(stop) = request.stop() {
            options.insert("stop".to_owned(), json!(stop));
        }
        if !options.is_empty() {
            body.insert("options".to_owned(), Value::Object(options));
        }
        Value::Object(body)
    }

    fn stream_preamble(&self, _model: &str) -> Vec<String> {
        Vec::new()
    }

    fn encode_stream_chunk(&self, model: &str, chunk: &StreamChunk) -> Vec<String> {
        let created_at = chrono::Utc::now().to_rfc3339();
        match chunk.delta() {
            ChunkDelta::Text { text } => vec![Self::line(json!({
                "model": model,
                "created_at": created_at,
                "message": {"role": "assistant", "content": text},
                "done": false,
            }))],
            ChunkDelta::Finish { reason } => vec![Self::line(json!({
                "model": model,
                "created_at": created_at,
                "message": {"role": "assistant", "content": ""},
                "done": true,
                "done_reason": reason.as_deref().unwrap_or("stop"),
            }))],
            ChunkDelta::Error { message } => vec![Self::line(json!({"error": message}))],
            ChunkDelta::ToolCall { .. } => Vec::new(),
        }
    }

    fn stream_epilogue(&self, _model: &str) -> Vec<String> {
        // the done:true line is the terminator on this wire
        Vec::new()
    }

    fn encode_response(&self, kind: RequestKind, response: &GatewayResponse) -> Value {
        let created_at = chrono::Utc::now().to_rfc3339();
        if kind == RequestKind::Chat {
            json!({
                "model": response.model(),
                "created_at": created_at,
                "message": {"role": "assistant", "content": response.message()},
                "done": true,
                "done_reason": response.finish_reason().unwrap_or("stop"),
            })
        } else {
            json!({
                "model": response.model(),
                "created_at": created_at,
                "response": response.message(),
                "done": true,
            })
        }
    }

    fn stream_content_type(&self) -> &'static str {
        "application/x-ndjson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_defaults_to_streaming() {
        let body = json!({
            "model": "qwen2.5-coder",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let request = OllamaFormat
            .decode_request(RequestKind::Chat, &body)
            .expect("decode");
        assert!(request.stream());
    }

    #[test]
    fn generate_round_trip_keeps_prompt_and_options() {
        let body = json!({
            "model": "qwen2.5-coder",
            "prompt": "complete this",
            "stream": false,
            "options": {"temperature": 0.2, "stop": ["\n\n"]},
        });
        let request = OllamaFormat
            .decode_request(RequestKind::Completion, &body)
            .expect("decode");
        assert!(!request.stream());
        let encoded = OllamaFormat.encode_request(&request);
        assert_eq!(encoded.get("prompt"), Some(&json!("complete this")));
        assert_eq!(
            encoded.pointer("/options/stop/0"),
            Some(&json!("\n\n"))
        );
    }

    #[test]
    fn finish_line_is_done_true() {
        let frames = OllamaFormat.encode_stream_chunk("m", &StreamChunk::finish(1, None));
        assert!(frames[0].contains("\"done\":true"));
    }
}
