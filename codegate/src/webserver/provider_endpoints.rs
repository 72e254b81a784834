//! Provider endpoint management API. API keys are write-only: they go in
//! through the DTO and never come back out.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use llm_client::provider::{ProviderAuth, ProviderKind};

use crate::application::application::Application;
use crate::workspace::types::ProviderEndpoint;

use super::types::{ApiError, ApiResponse, Result};
use super::Router;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_endpoints).post(create_endpoint))
        .route(
            "/:id",
            axum::routing::put(update_endpoint).delete(delete_endpoint),
        )
}

#[derive(Debug, Serialize)]
struct EndpointView {
    id: String,
    name: String,
    kind: ProviderKind,
    base_url: String,
    auth: &'static str,
}

impl ApiResponse for EndpointView {}

fn view(endpoint: &ProviderEndpoint) -> EndpointView {
    EndpointView {
        id: endpoint.id().to_owned(),
        name: endpoint.name().to_owned(),
        kind: endpoint.kind(),
        base_url: endpoint.base_url().to_owned(),
        auth: match endpoint.auth() {
            ProviderAuth::None => "none",
            ProviderAuth::ApiKey(_) => "api_key",
            ProviderAuth::Bearer(_) => "bearer",
        },
    }
}

#[derive(Debug, Deserialize)]
struct EndpointRequest {
    name: String,
    kind: ProviderKind,
    base_url: Option<String>,
    #[serde(default = "default_auth_kind")]
    auth: String,
    api_key: Option<String>,
}

fn default_auth_kind() -> String {
    "none".to_owned()
}

fn auth_from_request(request: &EndpointRequest) -> Result<ProviderAuth> {
    match (request.auth.as_str(), request.api_key.clone()) {
        ("none", _) => Ok(ProviderAuth::None),
        ("api_key", Some(key)) => Ok(ProviderAuth::ApiKey(key)),
        ("bearer", Some(token)) => Ok(ProviderAuth::Bearer(token)),
        ("api_key", None) | ("bearer", None) => Err(ApiError::bad_request(
            "auth kind requires an api_key".to_owned(),
        )),
        (other, _) => Err(ApiError::bad_request(format!(
            "unknown auth kind `{}`",
            other
        ))),
    }
}

async fn list_endpoints(Extension(app): Extension<Application>) -> Json<Vec<EndpointView>> {
    let snapshot = app.registry.snapshot();
    Json(snapshot.endpoints().iter().map(view).collect())
}

async fn create_endpoint(
    Extension(app): Extension<Application>,
    Json(request): Json<EndpointRequest>,
) -> Result<impl IntoResponse> {
    let auth = auth_from_request(&request)?;
    let base_url = request
        .base_url
        .unwrap_or_else(|| request.kind.default_base_url().to_owned());
    let endpoint = ProviderEndpoint::new(
        uuid::Uuid::new_v4().to_string(),
        request.name,
        request.kind,
        base_url,
        auth,
    );
    let endpoint = app.registry.upsert_endpoint(endpoint).await?;
    Ok((StatusCode::CREATED, Json(view(&endpoint))))
}

async fn update_endpoint(
    Extension(app): Extension<Application>,
    Path(id): Path<String>,
    Json(request): Json<EndpointRequest>,
) -> Result<Json<EndpointView>> {
    let snapshot = app.registry.snapshot();
    let existing = snapshot
        .endpoint_by_id(&id)
        .ok_or_else(|| ApiError::not_found(format!("provider endpoint `{}` not found", id)))?;
    // absent key on update keeps the stored credentials
    let auth = if request.api_key.is_none() && request.auth != "none" {
        existing.auth().clone()
    } else {
        auth_from_request(&request)?
    };
    let base_url = request
        .base_url
        .unwrap_or_else(|| existing.base_url().to_owned());
    let endpoint = ProviderEndpoint::new(id, request.name, request.kind, base_url, auth);
    let endpoint = app.registry.upsert_endpoint(endpoint).await?;
    Ok(Json(view(&endpoint)))
}

async fn delete_endpoint(
    Extension(app): Extension<Application>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    app.registry.delete_endpoint(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
