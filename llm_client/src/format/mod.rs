//! Per-provider request-in / response-out adapters between the native wire
//! JSON and the common shape. The stream side works in frames: a frame is
//! one fully-framed unit of the provider's streaming dialect (an SSE event
//! for the OpenAI and anthropic families, one NDJSON line for ollama).

pub mod anthropic;
pub mod ollama;
pub mod openai;

use thiserror::Error;

use crate::clients::types::{GatewayRequest, GatewayResponse, RequestKind, StreamChunk};
use crate::provider::ProviderKind;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("malformed request body: {0}")]
    InvalidShape(String),

    #[error("serde failed: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub trait WireFormat: Send + Sync {
    /// Native request JSON into the common shape. `kind` comes from the
    /// route the request arrived on; the decoder may refine it (a raw
    /// completion whose prompt carries fill-in-middle markers becomes FIM).
    fn decode_request(
        &self,
        kind: RequestKind,
        body: &serde_json::Value,
    ) -> Result<GatewayRequest, WireError>;

    /// Common shape back into native request JSON for the upstream call.
    /// Raw provider fields are restored first so an unmutated request
    /// round-trips byte-equivalently.
    fn encode_request(&self, request: &GatewayRequest) -> serde_json::Value;

    /// Frames emitted before the first delta.
    fn stream_preamble(&self, model: &str) -> Vec<String>;

    /// One common delta into zero or more wire frames.
    fn encode_stream_chunk(&self, model: &str, chunk: &StreamChunk) -> Vec<String>;

    /// Frames emitted after the finish delta.
    fn stream_epilogue(&self, model: &str) -> Vec<String>;

    /// Buffered non-stream response in the provider's native JSON.
    fn encode_response(&self, kind: RequestKind, response: &GatewayResponse)
        -> serde_json::Value;

    fn stream_content_type(&self) -> &'static str {
        "text/event-stream"
    }
}

/// The closed dispatch over provider dialects. Everything OpenAI-compatible
/// shares one adapter; llama.cpp exposes an OpenAI-compatible surface which
/// is the one the gateway normalizes through.
pub fn wire_format(kind: ProviderKind) -> &'static dyn WireFormat {
    match kind {
        ProviderKind::Anthropic => &anthropic::AnthropicFormat,
        ProviderKind::Ollama => &ollama::OllamaFormat,
        _ => &openai::OpenAiFormat,
    }
}

/// Wraps a JSON payload into one SSE frame.
pub(crate) fn sse_frame(data: &serde_json::Value) -> String {
    format!("data: {}\n\n", data)
}

/// SSE frame with an explicit event name, the anthropic dialect.
pub(crate) fn sse_event_frame(event: &str, data: &serde_json::Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}
