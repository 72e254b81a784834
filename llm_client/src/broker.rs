//! The llm client broker takes care of picking the right upstream client
//! for a provider kind so the pipeline never has to care which dialect the
//! chosen endpoint speaks.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::clients::{
    anthropic::AnthropicClient, llamacpp::LlamaCppClient, ollama::OllamaClient,
    openai::OpenAICompatClient, types::LLMClient,
};
use crate::clients::types::{GatewayRequest, GatewayResponse, LLMClientError, StreamChunk};
use crate::provider::{ProviderKind, UpstreamTarget};

pub struct LLMBroker {
    providers: HashMap<ProviderKind, Box<dyn LLMClient + Send + Sync>>,
}

impl LLMBroker {
    pub fn new() -> Self {
        let mut broker = Self {
            providers: HashMap::new(),
        };
        for kind in ProviderKind::all() {
            let client: Box<dyn LLMClient + Send + Sync> = match kind {
                ProviderKind::Anthropic => Box::new(AnthropicClient::new()),
                ProviderKind::Ollama => Box::new(OllamaClient::new()),
                ProviderKind::LlamaCpp => Box::new(LlamaCppClient::new()),
                openai_compatible => Box::new(OpenAICompatClient::new(*openai_compatible)),
            };
            broker = broker.add_provider(*kind, client);
        }
        broker
    }

    pub fn add_provider(
        mut self,
        kind: ProviderKind,
        client: Box<dyn LLMClient + Send + Sync>,
    ) -> Self {
        self.providers.insert(kind, client);
        self
    }

    pub async fn stream_completion(
        &self,
        kind: ProviderKind,
        target: &UpstreamTarget,
        request: GatewayRequest,
        sender: UnboundedSender<StreamChunk>,
    ) -> Result<GatewayResponse, LLMClientError> {
        let client = self
            .providers
            .get(&kind)
            .ok_or(LLMClientError::FailedToGetResponse)?;
        client.stream_completion(target, request, sender).await
    }

    pub async fn completion(
        &self,
        kind: ProviderKind,
        target: &UpstreamTarget,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, LLMClientError> {
        let client = self
            .providers
            .get(&kind)
            .ok_or(LLMClientError::FailedToGetResponse)?;
        client.completion(target, request).await
    }
}

impl Default for LLMBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_kind_has_a_client() {
        let broker = LLMBroker::new();
        for kind in ProviderKind::all() {
            assert!(broker.providers.contains_key(kind), "missing {}", kind);
        }
    }
}
