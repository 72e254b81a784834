//! The provider proxy surface. Every provider prefix accepts its native
//! shape plus the OpenAI-compatible shape where the upstream offers one;
//! `/v1/mux` is the workspace-routed entry. All of them funnel into
//! `dispatch`, which runs the pipeline and streams the result back in the
//! client's own dialect.

use std::convert::Infallible;

use axum::body::StreamBody;
use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use tracing::{info, warn};

use llm_client::clients::types::{
    ChunkDelta, GatewayResponse, LLMClientError, RequestKind, StreamChunk,
};
use llm_client::format::{wire_format, WireFormat};
use llm_client::provider::{ProviderAuth, ProviderKind};

use crate::application::application::Application;
use crate::db::audit::{self, PromptRecord};
use crate::pipeline::engine::ResponsePipeline;
use crate::pipeline::factory;
use crate::pipeline::types::{PipelineContext, PipelineVerdict, RouteMode};

use super::types::ApiError;
use super::Router;

pub fn router() -> Router {
    Router::new()
        // OpenAI-compatible surfaces, native for most providers
        .route("/:provider/chat/completions", post(openai_chat))
        .route("/:provider/v1/chat/completions", post(openai_chat))
        .route("/:provider/completions", post(openai_completions))
        .route("/:provider/v1/completions", post(openai_completions))
        .route("/:provider/embeddings", post(embeddings_passthrough))
        .route("/:provider/v1/embeddings", post(embeddings_passthrough))
        // anthropic native
        .route("/:provider/v1/messages", post(anthropic_messages))
        .route("/:provider/messages", post(anthropic_messages))
        // ollama native
        .route("/:provider/api/chat", post(ollama_chat))
        .route("/:provider/api/generate", post(ollama_generate))
        // llama.cpp native
        .route("/:provider/completion", post(llamacpp_completion))
        // the muxing entry
        .route("/v1/mux/chat/completions", post(mux_chat))
        .route("/v1/mux/completions", post(mux_completions))
}

fn provider_kind(provider: &str) -> Result<ProviderKind, ApiError> {
    ProviderKind::from_route_prefix(provider)
        .ok_or_else(|| ApiError::bad_request(format!("unknown provider prefix `{}`", provider)))
}

pub(crate) fn client_auth(headers: &HeaderMap) -> Option<ProviderAuth> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
        {
            return Some(ProviderAuth::Bearer(token.to_owned()));
        }
    }
    for name in ["x-api-key", "api-key"] {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            return Some(ProviderAuth::ApiKey(value.to_owned()));
        }
    }
    None
}

async fn openai_chat(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::OpenAI,
        RequestKind::Chat,
        body,
        client_auth(&headers),
    )
    .await
}

async fn openai_completions(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::OpenAI,
        RequestKind::Completion,
        body,
        client_auth(&headers),
    )
    .await
}

async fn anthropic_messages(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::Anthropic,
        RequestKind::Chat,
        body,
        client_auth(&headers),
    )
    .await
}

async fn ollama_chat(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::Ollama,
        RequestKind::Chat,
        body,
        client_auth(&headers),
    )
    .await
}

async fn ollama_generate(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::Ollama,
        RequestKind::Completion,
        body,
        client_auth(&headers),
    )
    .await
}

async fn llamacpp_completion(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    // llama.cpp's native /completion body has no model field
    if body.get("model").is_none() {
        if let Some(object) = body.as_object_mut() {
            object.insert("model".to_owned(), serde_json::json!("default"));
        }
    }
    dispatch(
        app,
        RouteMode::Fixed(kind),
        ProviderKind::OpenAI,
        RequestKind::Completion,
        body,
        client_auth(&headers),
    )
    .await
}

async fn mux_chat(
    Extension(app): Extension<Application>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch(
        app,
        RouteMode::Mux,
        ProviderKind::OpenAI,
        RequestKind::Chat,
        body,
        client_auth(&headers),
    )
    .await
}

async fn mux_completions(
    Extension(app): Extension<Application>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch(
        app,
        RouteMode::Mux,
        ProviderKind::OpenAI,
        RequestKind::Completion,
        body,
        client_auth(&headers),
    )
    .await
}

/// Embeddings carry no conversational content the inspection steps act on;
/// they are relayed to the configured upstream as-is.
async fn embeddings_passthrough(
    Extension(app): Extension<Application>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let kind = match provider_kind(&provider) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };
    let snapshot = app.registry.snapshot();
    let target = snapshot
        .endpoint_by_kind(kind)
        .map(|endpoint| endpoint.upstream_target())
        .unwrap_or_else(|| {
            llm_client::provider::UpstreamTarget::new(
                app.config.provider_base_url(kind),
                client_auth(&headers).unwrap_or(ProviderAuth::None),
            )
        });
    let url = format!("{}/embeddings", target.base_url());
    let client = reqwest::Client::new();
    let mut builder = client.post(url).json(&body);
    match target.auth() {
        ProviderAuth::None => {}
        ProviderAuth::ApiKey(key) => builder = builder.header("api-key", key.clone()),
        ProviderAuth::Bearer(token) => {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token))
        }
    }
    match builder.send().await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let payload = upstream
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            (status, Json(payload)).into_response()
        }
        Err(err) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    }
}

fn persist_alerts(app: &Application, ctx: &PipelineContext) {
    if ctx.alerts().is_empty() {
        return;
    }
    let db = app.sql.clone();
    let alerts = ctx.alerts().to_vec();
    tokio::spawn(async move {
        for alert in alerts {
            if let Err(err) = audit::insert_alert(&db, &alert).await {
                warn!(error = %err, "alert append failed");
            }
        }
    });
}

fn persist_prompt(
    app: &Application,
    ctx: &PipelineContext,
    provider: String,
    kind: RequestKind,
    request_json: serde_json::Value,
) {
    let db = app.sql.clone();
    let record = PromptRecord {
        id: ctx.prompt_id().to_owned(),
        workspace_id: ctx.workspace().id().to_owned(),
        timestamp: chrono::Utc::now(),
        provider,
        request: request_json,
        kind: kind.as_str().to_owned(),
    };
    tokio::spawn(async move {
        if let Err(err) = audit::insert_prompt(&db, &record).await {
            warn!(error = %err, "prompt append failed");
        }
    });
}

/// The single funnel for every completion-shaped route.
pub async fn dispatch(
    app: Application,
    route_mode: RouteMode,
    client_dialect: ProviderKind,
    kind_hint: RequestKind,
    body: serde_json::Value,
    auth: Option<ProviderAuth>,
) -> Response {
    let wire = wire_format(client_dialect);
    let request = match wire.decode_request(kind_hint, &body) {
        Ok(request) => request,
        Err(err) => return ApiError::bad_request(err.to_string()).into_response(),
    };
    let kind = request.kind();
    let stream_requested = request.stream();

    let store = app.current_session_store();
    let snapshot = app.registry.snapshot();
    let mut ctx = PipelineContext::new(
        snapshot,
        store.clone(),
        route_mode,
        Some(app.sql.clone()),
    )
    .with_client_auth(auth);

    let verdict = app.request_pipeline.run(request, &mut ctx).await;
    persist_alerts(&app, &ctx);

    match verdict {
        PipelineVerdict::Fail(failure, detail) => {
            ApiError::from_failure(failure, detail).into_response()
        }
        PipelineVerdict::Reply(response) => {
            info!(prompt_id = ctx.prompt_id(), "pipeline replied locally");
            persist_prompt(&app, &ctx, "codegate".to_owned(), kind, body);
            if stream_requested {
                synthetic_stream(wire, kind, response)
            } else {
                Json(wire.encode_response(kind, &response)).into_response()
            }
        }
        PipelineVerdict::Forward(request) => {
            let Some(route) = ctx.resolved_route().cloned() else {
                return ApiError::internal("pipeline finished without a route").into_response();
            };
            persist_prompt(
                &app,
                &ctx,
                route.endpoint().kind().to_string(),
                kind,
                wire.encode_request(&request),
            );

            let provider = route.endpoint().kind();
            let target = route.endpoint().upstream_target();
            let model = request.model().to_owned();
            let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
            let broker = app.llm_broker.clone();
            let upstream_request = request.clone();
            let upstream = tokio::spawn(async move {
                broker
                    .stream_completion(provider, &target, upstream_request, sender)
                    .await
            });

            let response_pipeline = factory::response_pipeline(store);
            if stream_requested {
                streamed_response(wire, model, receiver, response_pipeline, ctx, upstream)
            } else {
                buffered_response(wire, kind, receiver, response_pipeline, ctx, upstream).await
            }
        }
    }
}

fn frames_for(
    wire: &'static dyn WireFormat,
    model: &str,
    chunk: &StreamChunk,
) -> Vec<String> {
    wire.encode_stream_chunk(model, chunk)
}

/// Streams a locally-synthesized reply (policy short-circuit) in the
/// client's dialect, as if it came from an upstream.
fn synthetic_stream(
    wire: &'static dyn WireFormat,
    _kind: RequestKind,
    response: GatewayResponse,
) -> Response {
    let model = response.model().to_owned();
    let content_type = wire.stream_content_type();
    let stream = async_stream::stream! {
        for frame in wire.stream_preamble(&model) {
            yield Ok::<String, Infallible>(frame);
        }
        let text = StreamChunk::text(0, response.message().to_owned());
        for frame in frames_for(wire, &model, &text) {
            yield Ok(frame);
        }
        let finish = StreamChunk::finish(1, response.finish_reason().map(str::to_owned));
        for frame in frames_for(wire, &model, &finish) {
            yield Ok(frame);
        }
        for frame in wire.stream_epilogue(&model) {
            yield Ok(frame);
        }
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        StreamBody::new(stream),
    )
        .into_response()
}

/// The streaming path: a pull loop over upstream chunks, each one pushed
/// through the response steps and re-encoded in the client's dialect.
/// Dropping the returned body cancels the upstream within one chunk send.
fn streamed_response(
    wire: &'static dyn WireFormat,
    model: String,
    mut receiver: tokio::sync::mpsc::UnboundedReceiver<StreamChunk>,
    mut pipeline: ResponsePipeline,
    mut ctx: PipelineContext,
    upstream: tokio::task::JoinHandle<Result<GatewayResponse, LLMClientError>>,
) -> Response {
    let content_type = wire.stream_content_type();
    let stream = async_stream::stream! {
        for frame in wire.stream_preamble(&model) {
            yield Ok::<String, Infallible>(frame);
        }
        let mut saw_finish = false;
        while let Some(chunk) = receiver.recv().await {
            let is_finish = chunk.is_finish();
            for out in pipeline.push(chunk, &mut ctx) {
                for frame in frames_for(wire, &model, &out) {
                    yield Ok(frame);
                }
            }
            if is_finish {
                saw_finish = true;
                break;
            }
        }
        for out in pipeline.finish(&mut ctx) {
            for frame in frames_for(wire, &model, &out) {
                yield Ok(frame);
            }
        }
        if !saw_finish {
            // the upstream went away without a finish marker; surface what
            // happened and close the stream shape properly
            match upstream.await {
                Ok(Err(err)) => {
                    warn!(error = %err, "upstream stream ended abnormally");
                    let error_chunk = StreamChunk::new(
                        0,
                        ChunkDelta::Error {
                            message: err.to_string(),
                        },
                    );
                    for frame in frames_for(wire, &model, &error_chunk) {
                        yield Ok(frame);
                    }
                }
                _ => {}
            }
            let finish = StreamChunk::finish(0, None);
            for frame in frames_for(wire, &model, &finish) {
                yield Ok(frame);
            }
        }
        for frame in wire.stream_epilogue(&model) {
            yield Ok(frame);
        }
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        StreamBody::new(stream),
    )
        .into_response()
}

/// The non-stream path: drain the upstream through the same response steps
/// and fold the result (notice included) into one provider-native body.
async fn buffered_response(
    wire: &'static dyn WireFormat,
    kind: RequestKind,
    mut receiver: tokio::sync::mpsc::UnboundedReceiver<StreamChunk>,
    mut pipeline: ResponsePipeline,
    mut ctx: PipelineContext,
    upstream: tokio::task::JoinHandle<Result<GatewayResponse, LLMClientError>>,
) -> Response {
    let mut message = String::new();
    while let Some(chunk) = receiver.recv().await {
        for out in pipeline.push(chunk, &mut ctx) {
            if let Some(text) = out.as_text() {
                message.push_str(text);
            }
        }
    }
    for out in pipeline.finish(&mut ctx) {
        if let Some(text) = out.as_text() {
            message.push_str(text);
        }
    }
    match upstream.await {
        Ok(Ok(settled)) => {
            let mut response = GatewayResponse::new(message, settled.model().to_owned())
                .with_finish_reason(settled.finish_reason().map(str::to_owned));
            if let Some(usage) = settled.usage() {
                response = response.with_usage(usage.clone());
            }
            Json(wire.encode_response(kind, &response)).into_response()
        }
        Ok(Err(err)) if err.is_auth() => {
            ApiError::new(StatusCode::UNAUTHORIZED, err.to_string()).into_response()
        }
        Ok(Err(err)) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
        Err(join_err) => ApiError::internal(join_err.to_string()).into_response(),
    }
}
