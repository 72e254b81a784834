//! The anthropic `/v1/messages` dialect.

use serde_json::{json, Map, Value};

use crate::clients::types::{
    ChunkDelta, GatewayMessage, GatewayRequest, GatewayResponse, MessagePart, MessageRole,
    RequestKind, StreamChunk,
};

use super::{sse_event_frame, WireError, WireFormat};

const CONSUMED_KEYS: &[&str] = &[
    "model",
    "system",
    "messages",
    "stream",
    "temperature",
    "max_tokens",
    "stop_sequences",
];

pub struct AnthropicFormat;

impl AnthropicFormat {
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
                        Some("text") => parts.push(MessagePart::text(
                            block.get("text").and_then(Value::as_str).unwrap_or_default(),
                        )),
                        Some("tool_use") => parts.push(MessagePart::ToolUse {
                            id: block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                            name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                            input: block.get("input").cloned().unwrap_or(Value::Null),
                        }),
                        Some("tool_result") => parts.push(MessagePart::ToolResult {
                            id: block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                            content: match block.get("content") {
                                Some(Value::String(text)) => text.clone(),
                                Some(other) => other.to_string(),
                                None => String::new(),
                            },
                        }),
                        Some("image") => parts.push(MessagePart::ImageRef {
                            url: block
                                .pointer("/source/url")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                        }),
                        other => {
                            return Err(WireError::InvalidShape(format!(
                                "unsupported content block `{:?}`",
                                other
                            )))
                        }
                    }
                }
            }
            _ => return Err(WireError::MissingField("content")),
        }
        Ok(GatewayMessage::new(role, parts))
    }

    fn encode_message(message: &GatewayMessage) -> Value {
        let single_text = message.parts().len() == 1 && message.parts()[0].as_text().is_some();
        let content = if single_text {
            json!(message.parts()[0].as_text().unwrap_or_default())
        } else {
            Value::Array(
                message
                    .parts()
                    .iter()
                    .map(|part| match part {
                        MessagePart::Text { text } => json!({"type": "text", "text": text}),
                        MessagePart::ToolUse { id, name, input } => {
                            json!({"type": "tool_use", "id": id, "name": name, "input": input})
                        }
                        MessagePart::ToolResult { id, content } => {
                            json!({"type": "tool_result", "tool_use_id": id, "content": content})
                        }
                        MessagePart::ImageRef { url } => {
                            json!({"type": "image", "source": {"type": "url", "url": url}})
                        }
                    })
                    .collect(),
            )
        };
        json!({"role": message.role().as_str(), "content": content})
    }
}

impl WireFormat for AnthropicFormat {
    fn decode_request(
        &self,
        _kind: RequestKind,
        body: &Value,
    ) -> Result<GatewayRequest, WireError> {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("model"))?
            .to_owned();
        let raw_messages = body
            .get("messages")
            .and_then(Value::as_array)
            .ok_or(WireError::MissingField("messages"))?;
        let messages = raw_messages
            .iter()
            .map(Self::decode_message)
            .collect::<Result<Vec<_>, _>>()?;

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

        let mut request = GatewayRequest::new(RequestKind::Chat, model, messages)
            .set_raw_provider_fields(passthrough);
        match body.get("system") {
            // system can be a plain string or a list of text blocks
            Some(Value::String(system)) => request = request.set_system(system.clone()),
            Some(Value::Array(blocks)) => {
                let text = blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                request = request.set_system(text);
            }
            _ => {}
        }
        if let Some(stream) = body.get("stream").and_then(Value::as_bool) {
            request = request.set_stream(stream);
        }
        if let Some(temperature) = body.get("temperature").and_then(Value::as_f64) {
            request = request.set_temperature(temperature as f32);
        }
        if let Some(max_tokens) = body.get("max_tokens").and_then(Value::as_u64) {
            request = request.set_max_tokens(max_tokens);
        }
        if let Some(stops) = body.get("stop_sequences").and_then(Value::as_array) {
            request = request.set_stop(
                stops
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect(),
            );
        }
        Ok(request)
    }

    fn encode_request(&self, request: &GatewayRequest) -> Value {
        let mut body = request.raw_provider_fields().clone();
        body.insert("model".to_owned(), json!(request.model()));
        if let Some(system) = request.system() {
            body.insert("system".to_owned(), json!(system));
        }
        body.insert(
            "messages".to_owned(),
            Value::Array(request.messages().iter().map(Self::encode_message).collect()),
        );
        body.insert("stream".to_owned(), json!(request.stream()));
        if let Some(temperature) = request.temperature() {
            body.insert("temperature".to_owned(), json!(temperature));
        }
        // max_tokens is mandatory on this wire
        body.insert(
            "max_tokens".to_owned(),
            json!(request.max_tokens().unwrap_or(4096)),
        );
        if let Some(stop) = request.stop() {
            body.insert("stop_sequences".to_owned(), json!(stop));
        }
        Value::Object(body)
    }

    fn stream_preamble(&self, model: &str) -> Vec<String> {
        vec![
            sse_event_frame(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
                        "type": "message",
                        "role": "assistant",
                        "content": [],
                        "model": model,
                        "stop_reason": Value::Null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ),
            sse_event_frame(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": {"type": "text", "text": ""},
                }),
            ),
        ]
    }

    fn encode_stream_chunk(&self, _model: &str, chunk: &StreamChunk) -> Vec<String> {
        match chunk.delta() {
            ChunkDelta::Text { text } => vec![sse_event_frame(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": text},
                }),
            )],
            ChunkDelta::ToolCall {
                id,
                name,
                arguments,
            } => vec![sse_event_frame(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": 1,
                    "content_block": {"type": "tool_use", "id": id, "name": name,
                                      "input": arguments},
                }),
            )],
            ChunkDelta::Finish { reason } => vec![
                sse_event_frame(
                    "content_block_stop",
                    &json!({"type": "content_block_stop", "index": 0}),
                ),
                sse_event_frame(
                    "message_delta",
                    &json!({
                        "type": "message_delta",
                        "delta": {
                            "stop_reason": reason.as_deref().unwrap_or("end_turn"),
                            "stop_sequence": Value::Null,
                        },
                        "usage": {"output_tokens": 0},
                    }),
                ),
            ],
            ChunkDelta::Error { message } => vec![sse_event_frame(
                "error",
                &json!({"type": "error", "error": {"type": "api_error", "message": message}}),
            )],
        }
    }

    fn stream_epilogue(&self, _model: &str) -> Vec<String> {
        vec![sse_event_frame(
            "message_stop",
            &json!({"type": "message_stop"}),
        )]
    }

    fn encode_response(&self, _kind: RequestKind, response: &GatewayResponse) -> Value {
        json!({
            "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
            "type": "message",
            "role": "assistant",
            "model": response.model(),
            "content": [{"type": "text", "text": response.message()}],
            "stop_reason": response.finish_reason().unwrap_or("end_turn"),
            "stop_sequence": Value::Null,
            "usage": {
                "input_tokens": response.usage().map(|u| u.prompt_tokens).unwrap_or(0),
                "output_tokens": response.usage().map(|u| u.completion_tokens).unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_tool_blocks_intact() {
        let body = json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 1024,
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "let me look"},
                    {"type": "tool_use", "id": "tu_1", "name": "read_file",
                     "input": {"path": "a.py"}},
                ],
            }],
        });
        let request = AnthropicFormat
            .decode_request(RequestKind::Chat, &body)
            .expect("decode");
        assert_eq!(request.messages()[0].parts().len(), 2);
        let encoded = AnthropicFormat.encode_request(&request);
        assert_eq!(
            encoded.pointer("/messages/0/content/1/name"),
            Some(&json!("read_file"))
        );
    }

    #[test]
    fn system_block_list_is_flattened() {
        let body = json!({
            "model": "claude-3-5-sonnet",
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "messages": [{"role": "user", "content": "hi"}],
        });
        let request = AnthropicFormat
            .decode_request(RequestKind::Chat, &body)
            .expect("decode");
        assert_eq!(request.system(), Some("a\nb"));
    }

    #[test]
    fn finish_emits_stop_then_delta() {
        let frames = AnthropicFormat.encode_stream_chunk("m", &StreamChunk::finish(9, None));
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("event: content_block_stop"));
        assert!(frames[1].contains("end_turn"));
    }
}
