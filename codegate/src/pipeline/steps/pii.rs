//! PIIRedact: the same substitution pattern as the secret step, driven by
//! the entity recognizer.

use std::sync::Arc;

use async_trait::async_trait;

use llm_client::clients::types::GatewayRequest;

use crate::db::audit::AlertTrigger;
use crate::pipeline::types::{PipelineContext, RequestStep, StepOutcome};
use crate::redaction::pii::PiiRecognizer;
use crate::redaction::{self};

pub struct PiiRedact {
    recognizer: Arc<dyn PiiRecognizer>,
}

impl PiiRedact {
    pub fn new(recognizer: Arc<dyn PiiRecognizer>) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl RequestStep for PiiRedact {
    fn name(&self) -> &'static str {
        "pii-redact"
    }

    fn aborts_on_panic(&self) -> bool {
        true
    }

    async fn run(&self, mut request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome {
        let store = ctx.store().clone();
        let mut applied = Vec::new();
        request.visit_text_mut(|text| {
            let spans = self.recognizer.recognize(text);
            if spans.is_empty() {
                return;
            }
            applied.extend(redaction::redact_text(text, spans, &store));
        });
        if !applied.is_empty() {
            ctx.add_pii_redactions(applied.len());
            for entry in &applied {
                ctx.alert_on_string(
                    AlertTrigger::Pii,
                    entry.placeholder().to_owned(),
                    Some(entry.subtype().to_owned()),
                );
            }
        }
        StepOutcome::Continue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::pii::PatternEntityRecognizer;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use llm_client::clients::types::{GatewayMessage, RequestKind};

    #[tokio::test]
    async fn email_is_replaced_with_angle_bracket_placeholder() {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        );
        let step = PiiRedact::new(Arc::new(PatternEntityRecognizer));
        let request = GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![GatewayMessage::user("contact me at jane.doe@corp.example")],
        );
        let forwarded = match step.run(request, &mut ctx).await {
            StepOutcome::Continue(request) => request,
            _ => panic!("expected continue"),
        };
        let text = forwarded.messages()[0].text();
        assert!(!text.contains("jane.doe@corp.example"));
        assert!(text.contains('<') && text.contains('>'));
        assert_eq!(ctx.pii_redactions(), 1);
    }
}
