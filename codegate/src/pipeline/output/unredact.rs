//! The unredact response step: wraps the sliding-boundary restorer so text
//! deltas come out with literals restored, no matter where the provider cut
//! its chunks.

use std::sync::Arc;

use llm_client::clients::types::{ChunkDelta, StreamChunk};

use crate::pipeline::types::{PipelineContext, ResponseStep};
use crate::redaction::store::SubstitutionStore;
use crate::redaction::unredact::StreamRestorer;

pub struct UnredactStep {
    restorer: StreamRestorer,
}

impl UnredactStep {
    pub fn new(store: Arc<SubstitutionStore>) -> Self {
        Self {
            restorer: StreamRestorer::new(store),
        }
    }

    fn text_chunk(text: String) -> StreamChunk {
        StreamChunk::new(0, ChunkDelta::Text { text })
    }
}

impl ResponseStep for UnredactStep {
    fn name(&self) -> &'static str {
        "unredact"
    }

    fn run(&mut self, chunk: StreamChunk, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        match chunk.delta() {
            ChunkDelta::Text { text } => {
                let released = self.restorer.push(text);
                if released.is_empty() {
                    Vec::new()
                } else {
                    vec![Self::text_chunk(released)]
                }
            }
            // a non-text delta is a hard boundary, nothing buffered can
            // still complete a placeholder across it
            _ => {
                let mut out = Vec::new();
                let tail = self.restorer.flush();
                if !tail.is_empty() {
                    out.push(Self::text_chunk(tail));
                }
                out.push(chunk);
                out
            }
        }
    }

    fn flush(&mut self, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        let tail = self.restorer.flush();
        if tail.is_empty() {
            Vec::new()
        } else {
            vec![Self::text_chunk(tail)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::types::SpanOrigin;
    use crate::workspace::registry::WorkspaceRegistry;

    async fn ctx(store: Arc<SubstitutionStore>) -> PipelineContext {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        PipelineContext::new(registry.snapshot(), store, RouteMode::Mux, None)
    }

    fn collect_text(chunks: &[StreamChunk]) -> String {
        chunks
            .iter()
            .filter_map(|chunk| chunk.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    #[tokio::test]
    async fn split_placeholder_is_restored_before_finish() {
        let store = Arc::new(SubstitutionStore::new());
        let entry = store.placeholder_for("ghp_tok", SpanOrigin::Secret, "github");
        let placeholder = entry.placeholder().to_owned();
        let mut ctx = ctx(store.clone()).await;
        let mut step = UnredactStep::new(store);

        let (head, rest) = placeholder.split_at(15);
        let mut out = Vec::new();
        out.extend(step.run(StreamChunk::text(0, format!("token {}", head)), &mut ctx));
        out.extend(step.run(StreamChunk::text(1, rest.to_owned()), &mut ctx));
        out.extend(step.run(StreamChunk::finish(2, None), &mut ctx));
        assert_eq!(collect_text(&out), "token ghp_tok");
        assert!(out.last().unwrap().is_finish());
    }

    #[tokio::test]
    async fn finish_flushes_pending_tail() {
        let store = Arc::new(SubstitutionStore::new());
        let entry = store.placeholder_for("x", SpanOrigin::Secret, "s");
        let partial = entry.placeholder()[..10].to_owned();
        let mut ctx = ctx(store.clone()).await;
        let mut step = UnredactStep::new(store);
        // a partial placeholder that never completes is released verbatim
        let mut out = step.run(StreamChunk::text(0, partial.clone()), &mut ctx);
        out.extend(step.run(StreamChunk::finish(1, None), &mut ctx));
        assert_eq!(collect_text(&out), partial);
    }
}
