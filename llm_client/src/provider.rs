//! Contains types for the upstream provider a request is routed to. The set
//! of providers is closed, everything that speaks the OpenAI dialect shares
//! one client implementation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Hash, PartialEq, Eq)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "llamacpp")]
    LlamaCpp,
    #[serde(rename = "vllm")]
    Vllm,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "lm_studio")]
    LmStudio,
    #[serde(rename = "copilot")]
    Copilot,
}

impl ProviderKind {
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::OpenAI,
            ProviderKind::Anthropic,
            ProviderKind::Ollama,
            ProviderKind::LlamaCpp,
            ProviderKind::Vllm,
            ProviderKind::OpenRouter,
            ProviderKind::LmStudio,
            ProviderKind::Copilot,
        ]
    }

    /// The URL prefix the gateway serves this provider under.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::LlamaCpp => "llamacpp",
            ProviderKind::Vllm => "vllm",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::LmStudio => "lm-studio",
            ProviderKind::Copilot => "copilot",
        }
    }

    pub fn from_route_prefix(prefix: &str) -> Option<ProviderKind> {
        ProviderKind::all()
            .iter()
            .find(|kind| kind.route_prefix() == prefix)
            .copied()
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::LlamaCpp => "http://localhost:8000",
            ProviderKind::Vllm => "http://localhost:8000/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::LmStudio => "http://localhost:1234/v1",
            ProviderKind::Copilot => "https://api.githubcopilot.com",
        }
    }

    /// Everything except anthropic, ollama and llama.cpp speaks the OpenAI
    /// chat-completions dialect on the wire.
    pub fn is_openai_compatible(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAI
                | ProviderKind::Vllm
                | ProviderKind::OpenRouter
                | ProviderKind::LmStudio
                | ProviderKind::Copilot
        )
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.route_prefix())
    }
}

/// How the upstream call is authenticated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ProviderAuth {
    None,
    /// Sent in the provider's native key header (`x-api-key`, `api-key`).
    ApiKey(String),
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
}

impl ProviderAuth {
    pub fn secret(&self) -> Option<&str> {
        match self {
            ProviderAuth::None => None,
            ProviderAuth::ApiKey(key) | ProviderAuth::Bearer(key) => Some(key.as_str()),
        }
    }
}

/// The resolved destination of one upstream call: where to connect and how
/// to authenticate. Produced by the mux router, consumed by the clients.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    base_url: String,
    auth: ProviderAuth,
}

impl UpstreamTarget {
    pub fn new(base_url: String, auth: ProviderAuth) -> Self {
        Self { base_url, auth }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn auth(&self) -> &ProviderAuth {
        &self.auth
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderKind;

    #[test]
    fn route_prefix_round_trips() {
        for kind in ProviderKind::all() {
            assert_eq!(
                ProviderKind::from_route_prefix(kind.route_prefix()),
                Some(*kind)
            );
        }
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert_eq!(ProviderKind::from_route_prefix("groq"), None);
    }
}
