use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::provider::{ProviderKind, UpstreamTarget};

/// What shape of completion the client asked for. FIM arrives either on a
/// dedicated endpoint or as a completion whose prompt carries fill-in-middle
/// markers; the normalizers settle the kind before the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    Fim,
    Completion,
    Embeddings,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Fim => "fim",
            RequestKind::Completion => "completion",
            RequestKind::Embeddings => "embeddings",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(role: &str) -> Option<MessageRole> {
        match role {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" | "function" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// One ordered piece of a message. Text parts are the only parts the
/// inspection steps rewrite; the rest round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagePart {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult { id: String, content: String },
    ImageRef { url: String },
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        MessagePart::Text {
            text: content.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut String> {
        match self {
            MessagePart::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    role: MessageRole,
    parts: Vec<MessagePart>,
}

impl GatewayMessage {
    pub fn new(role: MessageRole, parts: Vec<MessagePart>) -> Self {
        Self { role, parts }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![MessagePart::text(content)])
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![MessagePart::text(content)])
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, vec![MessagePart::text(content)])
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [MessagePart] {
        &mut self.parts
    }

    /// All text parts joined, the form the detectors scan.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The provider-neutral request every wire format normalizes into. The
/// fields the pipeline does not understand stay in `raw_provider_fields`
/// so an unmutated round trip back to the same provider is byte-equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    kind: RequestKind,
    system: Option<String>,
    messages: Vec<GatewayMessage>,
    model: String,
    stream: bool,
    temperature: Option<f32>,
    max_tokens: Option<u64>,
    stop: Option<Vec<String>>,
    raw_provider_fields: serde_json::Map<String, serde_json::Value>,
}

impl GatewayRequest {
    pub fn new(kind: RequestKind, model: String, messages: Vec<GatewayMessage>) -> Self {
        Self {
            kind,
            system: None,
            messages,
            model,
            stream: false,
            temperature: None,
            max_tokens: None,
            stop: None,
            raw_provider_fields: serde_json::Map::new(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: RequestKind) {
        self.kind = kind;
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn set_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Prepends to the system prompt, keeping whatever the client sent.
    pub fn prepend_system(&mut self, prefix: &str) {
        self.system = Some(match self.system.take() {
            Some(existing) => format!("{}\n\n{}", prefix, existing),
            None => prefix.to_owned(),
        });
    }

    pub fn messages(&self) -> &[GatewayMessage] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<GatewayMessage> {
        &mut self.messages
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn set_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn set_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(&self) -> Option<u64> {
        self.max_tokens
    }

    pub fn set_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn stop(&self) -> Option<&[String]> {
        self.stop.as_deref()
    }

    pub fn set_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn raw_provider_fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.raw_provider_fields
    }

    pub fn set_raw_provider_fields(
        mut self,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.raw_provider_fields = fields;
        self
    }

    /// Every text part over all messages, scanned in order. The system
    /// prompt is not included, the client authored it separately.
    pub fn visit_text<F: FnMut(&str)>(&self, mut visit: F) {
        for message in &self.messages {
            for part in message.parts() {
                if let Some(text) = part.as_text() {
                    visit(text);
                }
            }
        }
    }

    pub fn visit_text_mut<F: FnMut(&mut String)>(&mut self, mut visit: F) {
        for message in &mut self.messages {
            for part in message.parts_mut() {
                if let Some(text) = part.as_text_mut() {
                    visit(text);
                }
            }
        }
    }

    /// The last user-authored text, used by the package policy to decide
    /// whether the request is asking about the packages it mentions.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role() == MessageRole::User)
            .map(|message| message.text())
    }
}

/// What flowed through one streamed delta. Ordering is carried by `seq`
/// and must stay strictly monotonic through every response step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChunkDelta {
    Text { text: String },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Finish { reason: Option<String> },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    seq: u64,
    delta: ChunkDelta,
    provider_meta: serde_json::Value,
}

impl StreamChunk {
    pub fn new(seq: u64, delta: ChunkDelta) -> Self {
        Self {
            seq,
            delta,
            provider_meta: serde_json::Value::Null,
        }
    }

    pub fn with_provider_meta(mut self, meta: serde_json::Value) -> Self {
        self.provider_meta = meta;
        self
    }

    pub fn text(seq: u64, text: impl Into<String>) -> Self {
        Self::new(seq, ChunkDelta::Text { text: text.into() })
    }

    pub fn finish(seq: u64, reason: Option<String>) -> Self {
        Self::new(seq, ChunkDelta::Finish { reason })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn delta(&self) -> &ChunkDelta {
        &self.delta
    }

    pub fn provider_meta(&self) -> &serde_json::Value {
        &self.provider_meta
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.delta {
            ChunkDelta::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self.delta, ChunkDelta::Finish { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The fully-buffered answer an upstream call settles into once the stream
/// is drained. Non-stream requests are served from this directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    message: String,
    model: String,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl GatewayResponse {
    pub fn new(message: String, model: String) -> Self {
        Self {
            message,
            model,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: Option<String>) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: String) {
        self.message = message;
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }
}

#[derive(Error, Debug)]
pub enum LLMClientError {
    #[error("failed to get a response from the upstream")]
    FailedToGetResponse,

    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("serde failed: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("send error over channel: {0}")]
    SendError(#[from] tokio::sync::mpsc::error::SendError<StreamChunk>),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream rejected the credentials")]
    AuthRejected,

    #[error("request kind {0} is not supported by this provider")]
    UnsupportedRequestKind(RequestKind),

    #[error("client went away mid stream")]
    ClientDisconnected,
}

impl LLMClientError {
    /// Upstream auth failures surface as 401/403 to the client, everything
    /// transport-shaped becomes a 502.
    pub fn is_auth(&self) -> bool {
        matches!(self, LLMClientError::AuthRejected)
            || matches!(self, LLMClientError::UpstreamStatus { status, .. } if *status == 401 || *status == 403)
    }
}

/// One upstream caller. Implementations decode the provider's stream into
/// `StreamChunk`s pushed through the sender and settle into the buffered
/// response. Dropping the receiver cancels the call at the next send.
#[async_trait]
pub trait LLMClient {
    fn kind(&self) -> ProviderKind;

    async fn stream_completion(
        &self,
        target: &UpstreamTarget,
        request: GatewayRequest,
        sender: UnboundedSender<StreamChunk>,
    ) -> Result<GatewayResponse, LLMClientError>;

    async fn completion(
        &self,
        target: &UpstreamTarget,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, LLMClientError> {
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        self.stream_completion(target, request, sender).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_system_keeps_client_prompt() {
        let mut request = GatewayRequest::new(
            RequestKind::Chat,
            "gpt-4".to_owned(),
            vec![GatewayMessage::user("hi")],
        )
        .set_system("You are a coding assistant.");
        request.prepend_system("Custom instructions first.");
        assert_eq!(
            request.system(),
            Some("Custom instructions first.\n\nYou are a coding assistant.")
        );
    }

    #[test]
    fn visit_text_mut_rewrites_only_text_parts() {
        let mut request = GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![GatewayMessage::new(
                MessageRole::User,
                vec![
                    MessagePart::text("secret"),
                    MessagePart::ImageRef {
                        url: "http://x/secret.png".to_owned(),
                    },
                ],
            )],
        );
        request.visit_text_mut(|text| *text = text.replace("secret", "[gone]"));
        assert_eq!(request.messages()[0].parts()[0].as_text(), Some("[gone]"));
        match &request.messages()[0].parts()[1] {
            MessagePart::ImageRef { url } => assert_eq!(url, "http://x/secret.png"),
            _ => panic!("image part changed shape"),
        }
    }

    #[test]
    fn last_user_text_skips_assistant_turns() {
        let request = GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![
                GatewayMessage::user("first"),
                GatewayMessage::assistant("answer"),
                GatewayMessage::user("second"),
            ],
        );
        assert_eq!(request.last_user_text().as_deref(), Some("second"));
    }
}
