//! SystemPromptInject: workspace custom instructions first, then the fixed
//! placeholder preamble whenever the session map holds substitutions.

use async_trait::async_trait;

use llm_client::clients::types::GatewayRequest;

use crate::pipeline::types::{PipelineContext, RequestStep, StepOutcome};

/// Tells the model to treat placeholders as opaque and echo them verbatim,
/// which is what makes the response-side restore work.
pub const REDACTION_PREAMBLE: &str = "Some values in this conversation were replaced with opaque \
placeholders of the form REDACTED_<id> or <uuid>. Treat every placeholder as an exact literal \
string: never alter, expand or explain one, and repeat it unchanged wherever the original \
value would appear.";

pub struct SystemPromptInject;

#[async_trait]
impl RequestStep for SystemPromptInject {
    fn name(&self) -> &'static str {
        "system-prompt-inject"
    }

    async fn run(&self, mut request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome {
        if !ctx.store().is_empty() {
            request.prepend_system(REDACTION_PREAMBLE);
        }
        if let Some(instructions) = ctx.workspace().custom_instructions() {
            if !instructions.trim().is_empty() {
                request.prepend_system(instructions);
            }
        }
        StepOutcome::Continue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::redaction::types::SpanOrigin;
    use crate::workspace::registry::WorkspaceRegistry;
    use llm_client::clients::types::{GatewayMessage, RequestKind};
    use std::sync::Arc;

    async fn ctx_with_store(store: Arc<SubstitutionStore>) -> PipelineContext {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        PipelineContext::new(registry.snapshot(), store, RouteMode::Mux, None)
    }

    fn request() -> GatewayRequest {
        GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![GatewayMessage::user("hi")],
        )
        .set_system("client system prompt")
    }

    #[tokio::test]
    async fn preamble_is_injected_only_after_redactions() {
        let store = Arc::new(SubstitutionStore::new());
        let mut ctx = ctx_with_store(store.clone()).await;
        let out = match SystemPromptInject.run(request(), &mut ctx).await {
            StepOutcome::Continue(out) => out,
            _ => panic!("expected continue"),
        };
        assert_eq!(out.system(), Some("client system prompt"));

        store.placeholder_for("secret", SpanOrigin::Secret, "s");
        let mut ctx = ctx_with_store(store).await;
        let out = match SystemPromptInject.run(request(), &mut ctx).await {
            StepOutcome::Continue(out) => out,
            _ => panic!("expected continue"),
        };
        let system = out.system().unwrap();
        assert!(system.starts_with(REDACTION_PREAMBLE));
        assert!(system.ends_with("client system prompt"));
    }
}
