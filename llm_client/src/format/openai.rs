//! The OpenAI chat-completions dialect, shared by openai, vllm, openrouter,
//! lm-studio and copilot. Raw completions (`/completions`) are folded into
//! the same adapter since only the prompt framing differs.

use serde_json::{json, Map, Value};

use crate::clients::types::{
    ChunkDelta, GatewayMessage, GatewayRequest, GatewayResponse, MessagePart, MessageRole,
    RequestKind, StreamChunk,
};
use crate::fim;

use super::{sse_frame, WireError, WireFormat};

/// Body keys the normalizer consumes; everything else rides along in
/// `raw_provider_fields`.
const CONSUMED_CHAT_KEYS: &[&str] = &["model", "messages", "stream", "temperature", "max_tokens", "stop"];
const CONSUMED_COMPLETION_KEYS: &[&str] = &["model", "prompt", "stream", "temperature", "max_tokens", "stop"];

pub struct OpenAiFormat;

impl OpenAiFormat {
    fn decode_message(message: &Value) -> Result<GatewayMessage, WireError> {
        let role_str = message
            .get("role")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("role"))?;
        let role = MessageRole::parse(role_str)
            .ok_or_else(|| WireError::InvalidShape(format!("unknown role `{}`", role_str)))?;

        let mut parts = Vec::new();
        match message.get("content") {
            Some(Value::String(text)) => parts.push(MessagePart::text(text.clone())),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            let text = block
                                .get("text")
                                .and_then(Value::as_str)
                                .ok_or(WireError::MissingField("text"))?;
                            parts.push(MessagePart::text(text));
                        }
                        Some("image_url") => {
                            let url = block
                                .pointer("/image_url/url")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            parts.push(MessagePart::ImageRef {
                                url: url.to_owned(),
                            });
                        }
                        other => {
                            return Err(WireError::InvalidShape(format!(
                                "unsupported content block `{:?}`",
                                other
                            )))
                        }
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(WireError::InvalidShape(format!(
                    "content must be a string or array, got {}",
                    other
                )))
            }
        }

        // Assistant turns may carry tool calls alongside (or instead of)
        // text content.
        if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in tool_calls {
                parts.push(MessagePart::ToolUse {
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
                    input: call
                        .pointer("/function/arguments")
                        .cloned()
                        .unwrap_or(Value::Null),
                });
            }
        }
        if role == MessageRole::Tool {
            let id = message
                .get("tool_call_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let content = parts
                .iter()
                .filter_map(MessagePart::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            parts = vec![MessagePart::ToolResult { id, content }];
        }

        Ok(GatewayMessage::new(role, parts))
    }

    fn encode_message(message: &GatewayMessage) -> Value {
        let mut tool_calls = Vec::new();
        let mut tool_result: Option<(&str, &str)> = None;
        let mut content_blocks = Vec::new();
        let mut plain_text: Option<String> = None;
        let text_parts = message
            .parts()
            .iter()
            .filter(|part| part.as_text().is_some())
            .count();

        for part in message.parts() {
            match part {
                MessagePart::Text { text } => {
                    if text_parts == 1 && message.parts().len() == 1 {
                        plain_text = Some(text.clone());
                    } else {
                        content_blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                MessagePart::ImageRef { url } => {
                    content_blocks.push(json!({"type": "image_url", "image_url": {"url": url}}));
                }
                MessagePart::ToolUse { id, name, input } => {
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": input},
                    }));
                }
                MessagePart::ToolResult { id, content } => {
                    tool_result = Some((id.as_str(), content.as_str()));
                }
            }
        }

        let mut out = Map::new();
        out.insert("role".to_owned(), json!(message.role().as_str()));
        if let Some((id, content)) = tool_result {
            out.insert("tool_call_id".to_owned(), json!(id));
            out.insert("content".to_owned(), json!(content));
        } else if let Some(text) = plain_text {
            out.insert("content".to_owned(), json!(text));
        } else if !content_blocks.is_empty() {
            out.insert("content".to_owned(), Value::Array(content_blocks));
        } else {
            out.insert("content".to_owned(), Value::Null);
        }
        if !tool_calls.is_empty() {
            out.insert("tool_calls".to_owned(), Value::Array(tool_calls));
        }
        Value::Object(out)
    }

    fn passthrough(body: &Value, consumed: &[&str]) -> Map<String, Value> {
        body.as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(key, _)| !consumed.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn decode_common(request: GatewayRequest, body: &Value) -> GatewayRequest {
        let mut request = request;
        if let Some(stream) = body.get("stream").and_then(Value::as_bool) {
            request = request.set_stream(stream);
        }
        if let Some(temperature) = body.get("temperature").and_then(Value::as_f64) {
            request = request.set_temperature(temperature as f32);
        }
        if let Some(max_tokens) = body.get("max_tokens").and_then(Value::as_u64) {
            request = request.set_max_tokens(max_tokens);
        }
        match body.get("stop") {
            Some(Value::String(stop)) => request = request.set_stop(vec![stop.clone()]),
            Some(Value::Array(stops)) => {
                request = request.set_stop(
                    stops
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect(),
                )
            }
            _ => {}
        }
        request
    }
}

impl WireFormat for OpenAiFormat {
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

        if kind == RequestKind::Chat {
            let raw_messages = body
                .get("messages")
                .and_then(Value::as_array)
                .ok_or(WireError::MissingField("messages"))?;
            let mut system = None;
            let mut messages = Vec::with_capacity(raw_messages.len());
            for raw in raw_messages {
                let message = Self::decode_message(raw)?;
                // A single leading system message becomes the request-level
                // system prompt, matching the anthropic shape.
                if message.role() == MessageRole::System && system.is_none() && messages.is_empty()
                {
                    system = Some(message.text());
                } else {
                    messages.push(message);
                }
            }
            let mut request = GatewayRequest::new(RequestKind::Chat, model, messages)
                .set_raw_provider_fields(Self::passthrough(body, CONSUMED_CHAT_KEYS));
            if let Some(system) = system {
                request = request.set_system(system);
            }
            Ok(Self::decode_common(request, body))
        } else {
            let prompt = body
                .get("prompt")
                .and_then(Value::as_str)
                .ok_or(WireError::MissingField("prompt"))?;
            let kind = if kind == RequestKind::Fim || fim::contains_fim_markers(prompt) {
                RequestKind::Fim
            } else {
                kind
            };
            let request = GatewayRequest::new(kind, model, vec![GatewayMessage::user(prompt)])
                .set_raw_provider_fields(Self::passthrough(body, CONSUMED_COMPLETION_KEYS));
            Ok(Self::decode_common(request, body))
        }
    }

    fn encode_request(&self, request: &GatewayRequest) -> Value {
        let mut body = request.raw_provider_fields().clone();
        body.insert("model".to_owned(), json!(request.model()));
        if request.kind() == RequestKind::Chat {
            let mut messages = Vec::new();
            if let Some(system) = request.system() {
                messages.push(json!({"role": "system", "content": system}));
            }
            messages.extend(request.messages().iter().map(Self::encode_message));
            body.insert("messages".to_owned(), Value::Array(messages));
        } else {
            let prompt = request
                .messages()
                .iter()
                .map(|message| message.text())
                .collect::<Vec<_>>()
                .join("\n");
            body.insert("prompt".to_owned(), json!(prompt));
        }
        body.insert("stream".to_owned(), json!(request.stream()));
        if let Some(temperature) = request.temperature() {
            body.insert("temperature".to_owned(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens() {
            body.insert("max_tokens".to_owned(), json!(max_tokens));
        }
        if let Some(stop) = request.stop() {
            body.insert("stop".to_owned(), json!(stop));
        }
        Value::Object(body)
    }

    fn stream_preamble(&self, _model: &str) -> Vec<String> {
        Vec::new()
    }

    fn encode_stream_chunk(&self, model: &str, chunk: &StreamChunk) -> Vec<String> {
        let choice = match chunk.delta() {
            ChunkDelta::Text { text } => {
                json!({"index": 0, "delta": {"content": text}, "finish_reason": Value::Null})
            }
            ChunkDelta::ToolCall {
                id,
                name,
                arguments,
            } => json!({
                "index": 0,
                "delta": {"tool_calls": [{"index": 0, "id": id, "type": "function",
                                          "function": {"name": name, "arguments": arguments}}]},
                "finish_reason": Value::Null,
            }),
            ChunkDelta::Finish { reason } => json!({
                "index": 0,
                "delta": {},
                "finish_reason": reason.as_deref().unwrap_or("stop"),
            }),
            ChunkDelta::Error { message } => {
                return vec![sse_frame(&json!({"error": {"message": message}}))]
            }
        };
        vec![sse_frame(&json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [choice],
        }))]
    }

    fn stream_epilogue(&self, _model: &str) -> Vec<String> {
        vec!["data: [DONE]\n\n".to_owned()]
    }

    fn encode_response(&self, kind: RequestKind, response: &GatewayResponse) -> Value {
        let usage = response.usage().map(|usage| {
            json!({
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.prompt_tokens + usage.completion_tokens,
            })
        });
        if kind == RequestKind::Chat {
            json!({
                "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": response.model(),
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": response.message()},
                    "finish_reason": response.finish_reason().unwrap_or("stop"),
                }],
                "usage": usage.unwrap_or(Value::Null),
            })
        } else {
            json!({
                "id": format!("cmpl-{}", uuid::Uuid::new_v4().simple()),
                "object": "text_completion",
                "created": chrono::Utc::now().timestamp(),
                "model": response.model(),
                "choices": [{
                    "index": 0,
                    "text": response.message(),
                    "finish_reason": response.finish_reason().unwrap_or("stop"),
                }],
                "usage": usage.unwrap_or(Value::Null),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_decode_lifts_leading_system_message() {
        let body = json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "You are a coding assistant."},
                {"role": "user", "content": "hello"},
            ],
            "stream": true,
            "user": "abc",
        });
        let request = OpenAiFormat
            .decode_request(RequestKind::Chat, &body)
            .expect("decode");
        assert_eq!(request.system(), Some("You are a coding assistant."));
        assert_eq!(request.messages().len(), 1);
        assert!(request.stream());
        assert_eq!(request.raw_provider_fields().get("user"), Some(&json!("abc")));
    }

    #[test]
    fn unmutated_round_trip_preserves_passthrough_fields() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
            "logit_bias": {"50256": -100},
        });
        let request = OpenAiFormat
            .decode_request(RequestKind::Chat, &body)
            .expect("decode");
        let encoded = OpenAiFormat.encode_request(&request);
        assert_eq!(encoded.get("logit_bias"), body.get("logit_bias"));
        assert_eq!(encoded.get("model"), body.get("model"));
        assert_eq!(
            encoded.pointer("/messages/0/content"),
            body.pointer("/messages/0/content")
        );
    }

    #[test]
    fn completion_with_fim_markers_becomes_fim() {
        let body = json!({
            "model": "qwen2.5-coder",
            "prompt": "<|fim_prefix|>fn main() {<|fim_suffix|>}<|fim_middle|>",
        });
        let request = OpenAiFormat
            .decode_request(RequestKind::Completion, &body)
            .expect("decode");
        assert_eq!(request.kind(), RequestKind::Fim);
    }

    #[test]
    fn finish_chunk_carries_finish_reason() {
        let frames =
            OpenAiFormat.encode_stream_chunk("m", &StreamChunk::finish(3, Some("stop".into())));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"finish_reason\":\"stop\""));
    }
}
