//! CodeSnippetExtract: walk the messages, parse fenced blocks with the
//! matching grammar and collect package identifiers for the policy step.

use std::sync::Arc;

use async_trait::async_trait;

use llm_client::clients::types::GatewayRequest;

use crate::extraction::CodeExtractor;
use crate::pipeline::types::{PipelineContext, RequestStep, StepOutcome};

pub struct CodeSnippetExtract {
    extractor: Arc<CodeExtractor>,
}

impl CodeSnippetExtract {
    pub fn new(extractor: Arc<CodeExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl RequestStep for CodeSnippetExtract {
    fn name(&self) -> &'static str {
        "code-snippet-extract"
    }

    async fn run(&self, request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome {
        let mut packages = Vec::new();
        request.visit_text(|text| {
            packages.extend(self.extractor.extract_from_text(text).packages);
        });
        packages.dedup();
        ctx.set_extracted_packages(packages);
        StepOutcome::Continue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use llm_client::clients::types::{GatewayMessage, RequestKind};

    #[tokio::test]
    async fn extracted_packages_land_in_context() {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        );
        let request = GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![GatewayMessage::user(
                "```python\nimport invokehttp\n```\nwhat does this do?",
            )],
        );
        let step = CodeSnippetExtract::new(Arc::new(CodeExtractor::new()));
        match step.run(request, &mut ctx).await {
            StepOutcome::Continue(_) => {}
            _ => panic!("expected continue"),
        }
        assert_eq!(ctx.extracted_packages().len(), 1);
        assert_eq!(ctx.extracted_packages()[0].name, "invokehttp");
    }
}
