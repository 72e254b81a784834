//! PersistOutputs: fan the finished output out to the audit log. Spawned,
//! best-effort; a failed append never blocks or fails delivery.

use chrono::Utc;

use llm_client::clients::types::{ChunkDelta, StreamChunk};

use crate::db::audit::{self, OutputRecord};
use crate::pipeline::types::{PipelineContext, ResponseStep};

pub struct PersistStep {
    buffered: String,
}

impl PersistStep {
    pub fn new() -> Self {
        Self {
            buffered: String::new(),
        }
    }
}

impl Default for PersistStep {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStep for PersistStep {
    fn name(&self) -> &'static str {
        "persist-outputs"
    }

    fn run(&mut self, chunk: StreamChunk, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        if let ChunkDelta::Text { text } = chunk.delta() {
            self.buffered.push_str(text);
        }
        vec![chunk]
    }

    fn flush(&mut self, ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        let Some(db) = ctx.db().cloned() else {
            return Vec::new();
        };
        let record = OutputRecord {
            id: uuid::Uuid::new_v4().to_string(),
            prompt_id: ctx.prompt_id().to_owned(),
            timestamp: Utc::now(),
            output: serde_json::json!({ "content": std::mem::take(&mut self.buffered) }),
        };
        tokio::spawn(async move {
            if let Err(err) = audit::insert_output(&db, &record).await {
                tracing::warn!(error = %err, "output append failed");
            }
        });
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn output_is_appended_after_flush() {
        let pool = Arc::new(crate::db::sqlite::init_in_memory().await.expect("db"));
        let registry = WorkspaceRegistry::load(pool.clone()).await.expect("load");
        let mut ctx = PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            Some(pool.clone()),
        );
        let mut step = PersistStep::new();
        step.run(StreamChunk::text(0, "hel"), &mut ctx);
        step.run(StreamChunk::text(1, "lo"), &mut ctx);
        step.flush(&mut ctx);
        // the append is spawned; poll briefly for it
        for _ in 0..50 {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outputs")
                .fetch_one(pool.as_ref())
                .await
                .expect("count");
            if count.0 == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("output row never appeared");
    }
}
