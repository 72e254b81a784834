//! The drivers. The request engine is a plain match over step outcomes;
//! the response engine cascades each incoming chunk through the step chain
//! and keeps `seq` strictly monotonic on the way out.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use llm_client::clients::types::{GatewayRequest, StreamChunk};

use super::types::{
    FailureKind, PipelineContext, PipelineVerdict, RequestStep, ResponseStep, StepOutcome,
};

pub struct RequestPipeline {
    steps: Vec<Arc<dyn RequestStep>>,
}

impl RequestPipeline {
    pub fn new(steps: Vec<Arc<dyn RequestStep>>) -> Self {
        Self { steps }
    }

    pub async fn run(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> PipelineVerdict {
        for step in &self.steps {
            // failure containment: a panicking step is skipped with the
            // pre-step request, unless it is a redaction step (never
            // fail-open for secrets)
            let before = request.clone();
            let outcome = std::panic::AssertUnwindSafe(step.run(request, ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(StepOutcome::Continue(next)) => request = next,
                Ok(StepOutcome::ReplyNow(response)) => {
                    return PipelineVerdict::Reply(response);
                }
                Ok(StepOutcome::Fail(kind, detail)) => {
                    return PipelineVerdict::Fail(kind, detail);
                }
                Err(_) => {
                    if step.aborts_on_panic() {
                        error!(step = step.name(), "redaction step panicked, aborting");
                        return PipelineVerdict::Fail(
                            FailureKind::Upstream,
                            format!("step {} failed before upstream dispatch", step.name()),
                        );
                    }
                    warn!(step = step.name(), "step panicked, continuing unmutated");
                    request = before;
                }
            }
        }
        PipelineVerdict::Forward(request)
    }
}

pub struct ResponsePipeline {
    steps: Vec<Box<dyn ResponseStep>>,
    out_seq: u64,
}

impl ResponsePipeline {
    pub fn new(steps: Vec<Box<dyn ResponseStep>>) -> Self {
        Self { steps, out_seq: 0 }
    }

    fn cascade(
        &mut self,
        start: usize,
        chunks: Vec<StreamChunk>,
        ctx: &mut PipelineContext,
    ) -> Vec<StreamChunk> {
        let mut current = chunks;
        for index in start..self.steps.len() {
            let mut next = Vec::new();
            for chunk in current {
                next.extend(self.steps[index].run(chunk, ctx));
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }

    fn renumber(&mut self, mut chunks: Vec<StreamChunk>) -> Vec<StreamChunk> {
        for chunk in &mut chunks {
            chunk.set_seq(self.out_seq);
            self.out_seq += 1;
        }
        chunks
    }

    /// Feeds one upstream chunk through every step.
    pub fn push(&mut self, chunk: StreamChunk, ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        let out = self.cascade(0, vec![chunk], ctx);
        self.renumber(out)
    }

    /// Drains step buffers in order; each step's tail still traverses the
    /// steps after it.
    pub fn finish(&mut self, ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        for index in 0..self.steps.len() {
            let flushed = self.steps[index].flush(ctx);
            if !flushed.is_empty() {
                out.extend(self.cascade(index + 1, flushed, ctx));
            }
        }
        self.renumber(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use async_trait::async_trait;
    use llm_client::clients::types::{ChunkDelta, GatewayMessage, GatewayResponse, RequestKind};

    async fn test_ctx() -> PipelineContext {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        )
    }

    fn request() -> GatewayRequest {
        GatewayRequest::new(
            RequestKind::Chat,
            "m".to_owned(),
            vec![GatewayMessage::user("hi")],
        )
    }

    struct Uppercase;

    #[async_trait]
    impl RequestStep for Uppercase {
        fn name(&self) -> &'static str {
            "uppercase"
        }

        async fn run(&self, mut request: GatewayRequest, _ctx: &mut PipelineContext) -> StepOutcome {
            request.visit_text_mut(|text| *text = text.to_uppercase());
            StepOutcome::Continue(request)
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl RequestStep for ShortCircuit {
        fn name(&self) -> &'static str {
            "short-circuit"
        }

        async fn run(&self, request: GatewayRequest, _ctx: &mut PipelineContext) -> StepOutcome {
            StepOutcome::ReplyNow(GatewayResponse::new(
                "blocked".to_owned(),
                request.model().to_owned(),
            ))
        }
    }

    struct Panicker;

    #[async_trait]
    impl RequestStep for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }

        async fn run(&self, _request: GatewayRequest, _ctx: &mut PipelineContext) -> StepOutcome {
            panic!("boom")
        }
    }

    struct FatalPanicker;

    #[async_trait]
    impl RequestStep for FatalPanicker {
        fn name(&self) -> &'static str {
            "fatal-panicker"
        }

        fn aborts_on_panic(&self) -> bool {
            true
        }

        async fn run(&self, _request: GatewayRequest, _ctx: &mut PipelineContext) -> StepOutcome {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn steps_chain_mutations() {
        let pipeline = RequestPipeline::new(vec![Arc::new(Uppercase)]);
        let mut ctx = test_ctx().await;
        match pipeline.run(request(), &mut ctx).await {
            PipelineVerdict::Forward(result) => {
                assert_eq!(result.messages()[0].text(), "HI");
            }
            _ => panic!("expected forward"),
        }
    }

    #[tokio::test]
    async fn reply_now_skips_later_steps() {
        let pipeline = RequestPipeline::new(vec![Arc::new(ShortCircuit), Arc::new(FatalPanicker)]);
        let mut ctx = test_ctx().await;
        match pipeline.run(request(), &mut ctx).await {
            PipelineVerdict::Reply(response) => assert_eq!(response.message(), "blocked"),
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn panicking_step_is_local_by_default() {
        let pipeline = RequestPipeline::new(vec![Arc::new(Panicker), Arc::new(Uppercase)]);
        let mut ctx = test_ctx().await;
        match pipeline.run(request(), &mut ctx).await {
            PipelineVerdict::Forward(result) => {
                assert_eq!(result.messages()[0].text(), "HI");
            }
            _ => panic!("expected forward"),
        }
    }

    #[tokio::test]
    async fn panicking_redaction_step_aborts() {
        let pipeline = RequestPipeline::new(vec![Arc::new(FatalPanicker)]);
        let mut ctx = test_ctx().await;
        match pipeline.run(request(), &mut ctx).await {
            PipelineVerdict::Fail(FailureKind::Upstream, _) => {}
            _ => panic!("expected upstream failure"),
        }
    }

    struct Doubler;

    impl ResponseStep for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        fn run(&mut self, chunk: StreamChunk, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
            vec![chunk.clone(), chunk]
        }
    }

    struct Holder {
        held: Vec<StreamChunk>,
    }

    impl ResponseStep for Holder {
        fn name(&self) -> &'static str {
            "holder"
        }

        fn run(&mut self, chunk: StreamChunk, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
            self.held.push(chunk);
            Vec::new()
        }

        fn flush(&mut self, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
            std::mem::take(&mut self.held)
        }
    }

    #[tokio::test]
    async fn response_seq_is_strictly_monotonic() {
        let mut ctx = test_ctx().await;
        let mut pipeline = ResponsePipeline::new(vec![Box::new(Doubler)]);
        let first = pipeline.push(StreamChunk::text(7, "a"), &mut ctx);
        let second = pipeline.push(StreamChunk::text(3, "b"), &mut ctx);
        let seqs: Vec<u64> = first.iter().chain(second.iter()).map(|c| c.seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn flushed_chunks_traverse_later_steps() {
        let mut ctx = test_ctx().await;
        let mut pipeline =
            ResponsePipeline::new(vec![Box::new(Holder { held: Vec::new() }), Box::new(Doubler)]);
        assert!(pipeline.push(StreamChunk::text(0, "x"), &mut ctx).is_empty());
        let out = pipeline.finish(&mut ctx);
        assert_eq!(out.len(), 2, "holder tail must pass through the doubler");
        assert!(matches!(out[0].delta(), ChunkDelta::Text { text } if text == "x"));
    }
}
