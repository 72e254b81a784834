//! MuxResolve: settle the concrete upstream target. Provider-prefixed
//! routes pin the kind and fall back to the configured default base url;
//! the mux entry evaluates the workspace rules and rewrites the model.

use std::collections::HashMap;

use async_trait::async_trait;

use llm_client::clients::types::GatewayRequest;
use llm_client::provider::{ProviderAuth, ProviderKind};

use crate::mux::router::{MuxRouter, ResolvedRoute, RouteError};
use crate::pipeline::types::{FailureKind, PipelineContext, RequestStep, RouteMode, StepOutcome};
use crate::workspace::types::ProviderEndpoint;

pub struct MuxResolve {
    provider_urls: HashMap<ProviderKind, String>,
}

impl MuxResolve {
    pub fn new(provider_urls: HashMap<ProviderKind, String>) -> Self {
        Self { provider_urls }
    }

    fn fixed_endpoint(&self, kind: ProviderKind, ctx: &PipelineContext) -> ProviderEndpoint {
        if let Some(endpoint) = ctx.snapshot().endpoint_by_kind(kind) {
            return endpoint.clone();
        }
        let base_url = self
            .provider_urls
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_base_url().to_owned());
        // without a configured endpoint the client's own credentials ride
        // through to the upstream
        let auth = ctx.client_auth().cloned().unwrap_or(ProviderAuth::None);
        ProviderEndpoint::new(
            format!("builtin-{}", kind.route_prefix()),
            format!("{} (built-in)", kind.route_prefix()),
            kind,
            base_url,
            auth,
        )
    }
}

#[async_trait]
impl RequestStep for MuxResolve {
    fn name(&self) -> &'static str {
        "mux-resolve"
    }

    async fn run(&self, mut request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome {
        match ctx.route_mode() {
            RouteMode::Fixed(kind) => {
                let endpoint = self.fixed_endpoint(kind, ctx);
                let model = request.model().to_owned();
                ctx.set_resolved_route(ResolvedRoute::new(endpoint, model));
                StepOutcome::Continue(request)
            }
            RouteMode::Mux => {
                let workspace = ctx.workspace().clone();
                match MuxRouter::resolve(&workspace, ctx.snapshot().endpoints(), &request) {
                    Ok(route) => {
                        request.set_model(route.model());
                        ctx.set_resolved_route(route);
                        StepOutcome::Continue(request)
                    }
                    Err(err @ RouteError::NoRuleMatches) => {
                        StepOutcome::Fail(FailureKind::Route, err.to_string())
                    }
                    Err(err) => StepOutcome::Fail(FailureKind::Route, err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::types::MuxRule;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use llm_client::clients::types::{GatewayMessage, RequestKind};
    use std::sync::Arc;

    fn chat(model: &str) -> GatewayRequest {
        GatewayRequest::new(
            RequestKind::Chat,
            model.to_owned(),
            vec![GatewayMessage::user("hi")],
        )
    }

    #[tokio::test]
    async fn mux_route_rewrites_the_model() {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        registry
            .upsert_endpoint(crate::workspace::types::ProviderEndpoint::new(
                "ep1".into(),
                "local".into(),
                ProviderKind::Ollama,
                "http://localhost:11434".into(),
                ProviderAuth::None,
            ))
            .await
            .expect("endpoint");
        registry.create_workspace("w1").await.expect("create");
        registry
            .set_mux_rules(
                "w1",
                vec![MuxRule::catch_all("ep1".into(), "qwen2.5-coder:1.5b".into())],
            )
            .await
            .expect("rules");
        registry.activate_workspace("w1").await.expect("activate");

        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        );
        let step = MuxResolve::new(HashMap::new());
        let out = match step.run(chat("whatever-the-client-said"), &mut ctx).await {
            StepOutcome::Continue(out) => out,
            _ => panic!("expected continue"),
        };
        assert_eq!(out.model(), "qwen2.5-coder:1.5b");
        assert_eq!(
            ctx.resolved_route().unwrap().endpoint().kind(),
            ProviderKind::Ollama
        );
    }

    #[tokio::test]
    async fn empty_rule_list_fails_with_route_error() {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        );
        let step = MuxResolve::new(HashMap::new());
        match step.run(chat("m"), &mut ctx).await {
            StepOutcome::Fail(FailureKind::Route, detail) => {
                assert!(detail.contains("no mux rule matches"));
            }
            _ => panic!("expected route failure"),
        }
    }

    #[tokio::test]
    async fn fixed_route_keeps_model_and_uses_defaults() {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Fixed(ProviderKind::Ollama),
            None,
        );
        let step = MuxResolve::new(HashMap::new());
        let out = match step.run(chat("qwen2.5-coder"), &mut ctx).await {
            StepOutcome::Continue(out) => out,
            _ => panic!("expected continue"),
        };
        assert_eq!(out.model(), "qwen2.5-coder");
        let route = ctx.resolved_route().unwrap();
        assert_eq!(route.endpoint().base_url(), "http://localhost:11434");
    }
}
