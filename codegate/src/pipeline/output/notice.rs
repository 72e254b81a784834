//! AlertFinalize: when anything was redacted on the way in, a synthetic
//! notice chunk is inserted before the first text delta so the client sees
//! it at the top of the reply.

use llm_client::clients::types::{ChunkDelta, StreamChunk};

use crate::pipeline::types::{PipelineContext, ResponseStep};

pub struct NoticeStep {
    injected: bool,
}

impl NoticeStep {
    pub fn new() -> Self {
        Self { injected: false }
    }
}

impl Default for NoticeStep {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStep for NoticeStep {
    fn name(&self) -> &'static str {
        "alert-finalize"
    }

    fn run(&mut self, chunk: StreamChunk, ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        if self.injected || !matches!(chunk.delta(), ChunkDelta::Text { .. }) {
            return vec![chunk];
        }
        self.injected = true;
        match ctx.redaction_notice() {
            Some(notice) => vec![
                StreamChunk::new(0, ChunkDelta::Text { text: notice }),
                chunk,
            ],
            None => vec![chunk],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use std::sync::Arc;

    async fn ctx() -> PipelineContext {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        )
    }

    #[tokio::test]
    async fn notice_lands_once_before_first_text() {
        let mut ctx = ctx().await;
        ctx.add_secret_redactions(1);
        let mut step = NoticeStep::new();
        let first = step.run(StreamChunk::text(0, "hello"), &mut ctx);
        assert_eq!(first.len(), 2);
        assert!(first[0]
            .as_text()
            .unwrap()
            .contains("CodeGate prevented 1 secret"));
        let second = step.run(StreamChunk::text(1, "more"), &mut ctx);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn no_redactions_means_no_notice() {
        let mut ctx = ctx().await;
        let mut step = NoticeStep::new();
        let out = step.run(StreamChunk::text(0, "hello"), &mut ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_text(), Some("hello"));
    }
}
