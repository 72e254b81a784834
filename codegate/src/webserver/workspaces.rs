//! Workspace lifecycle management API.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::application::application::Application;
use crate::mux::types::{MuxMatcherType, MuxRule};
use crate::workspace::types::Workspace;

use super::types::{ApiError, ApiResponse, Result};
use super::Router;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_workspaces).post(create_workspace))
        .route("/archive", get(list_archived))
        .route("/:name", put(rename_workspace).delete(hard_delete))
        .route("/:name/activate", post(activate))
        .route("/:name/archive", post(archive))
        .route("/:name/recover", post(recover))
        .route("/:name/muxes", get(get_muxes).put(set_muxes))
        .route(
            "/:name/custom-instructions",
            get(get_custom_instructions).put(set_custom_instructions),
        )
}

#[derive(Debug, Serialize)]
struct WorkspaceView {
    name: String,
    state: String,
    is_active: bool,
    custom_instructions: Option<String>,
}

impl ApiResponse for WorkspaceView {}

fn view(workspace: &Workspace, active_id: &str) -> WorkspaceView {
    WorkspaceView {
        name: workspace.name().to_owned(),
        state: workspace.state().as_str().to_owned(),
        is_active: workspace.id() == active_id,
        custom_instructions: workspace.custom_instructions().map(str::to_owned),
    }
}

async fn list_workspaces(Extension(app): Extension<Application>) -> Json<Vec<WorkspaceView>> {
    let snapshot = app.registry.snapshot();
    let active_id = snapshot.session().active_workspace_id().to_owned();
    Json(
        snapshot
            .workspaces()
            .iter()
            .filter(|workspace| !workspace.is_archived())
            .map(|workspace| view(workspace, &active_id))
            .collect(),
    )
}

async fn list_archived(Extension(app): Extension<Application>) -> Json<Vec<WorkspaceView>> {
    let snapshot = app.registry.snapshot();
    let active_id = snapshot.session().active_workspace_id().to_owned();
    Json(
        snapshot
            .workspaces()
            .iter()
            .filter(|workspace| workspace.is_archived())
            .map(|workspace| view(workspace, &active_id))
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct CreateWorkspaceRequest {
    name: String,
}

async fn create_workspace(
    Extension(app): Extension<Application>,
    Json(request): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse> {
    let workspace = app.registry.create_workspace(&request.name).await?;
    let snapshot = app.registry.snapshot();
    Ok((
        StatusCode::CREATED,
        Json(view(&workspace, snapshot.session().active_workspace_id())),
    ))
}

#[derive(Debug, Deserialize)]
struct RenameWorkspaceRequest {
    name: String,
}

async fn rename_workspace(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
    Json(request): Json<RenameWorkspaceRequest>,
) -> Result<Json<WorkspaceView>> {
    let workspace = app.registry.rename_workspace(&name, &request.name).await?;
    let snapshot = app.registry.snapshot();
    Ok(Json(view(
        &workspace,
        snapshot.session().active_workspace_id(),
    )))
}

async fn hard_delete(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    app.registry.hard_delete_workspace(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    app.registry.activate_workspace(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    app.registry.archive_workspace(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recover(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    app.registry.recover_workspace(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wire shape of one mux rule, matching the data model exactly.
#[derive(Debug, Serialize, Deserialize)]
struct MuxRuleDto {
    provider_endpoint_id: String,
    model_name: String,
    matcher_type: String,
    #[serde(default)]
    matcher: String,
}

impl ApiResponse for MuxRuleDto {}

async fn get_muxes(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<Json<Vec<MuxRuleDto>>> {
    let snapshot = app.registry.snapshot();
    let workspace = snapshot
        .workspace_by_name(&name)
        .ok_or_else(|| ApiError::not_found(format!("workspace `{}` not found", name)))?;
    Ok(Json(
        workspace
            .mux_rules()
            .iter()
            .map(|rule| MuxRuleDto {
                provider_endpoint_id: rule.provider_endpoint_id().to_owned(),
                model_name: rule.model_name().to_owned(),
                matcher_type: rule.matcher_type().as_str().to_owned(),
                matcher: rule.matcher().to_owned(),
            })
            .collect(),
    ))
}

async fn set_muxes(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
    Json(rules): Json<Vec<MuxRuleDto>>,
) -> Result<StatusCode> {
    let rules = rules
        .into_iter()
        .map(|dto| {
            let matcher_type = MuxMatcherType::parse(&dto.matcher_type).ok_or_else(|| {
                ApiError::bad_request(format!("unknown matcher type `{}`", dto.matcher_type))
            })?;
            MuxRule::new(
                dto.provider_endpoint_id,
                dto.model_name,
                matcher_type,
                dto.matcher,
            )
            .map_err(|err| ApiError::bad_request(err.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    app.registry.set_mux_rules(&name, rules).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
struct CustomInstructionsDto {
    prompt: Option<String>,
}

impl ApiResponse for CustomInstructionsDto {}

async fn get_custom_instructions(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
) -> Result<Json<CustomInstructionsDto>> {
    let snapshot = app.registry.snapshot();
    let workspace = snapshot
        .workspace_by_name(&name)
        .ok_or_else(|| ApiError::not_found(format!("workspace `{}` not found", name)))?;
    Ok(Json(CustomInstructionsDto {
        prompt: workspace.custom_instructions().map(str::to_owned),
    }))
}

async fn set_custom_instructions(
    Extension(app): Extension<Application>,
    Path(name): Path<String>,
    Json(request): Json<CustomInstructionsDto>,
) -> Result<StatusCode> {
    app.registry
        .set_custom_instructions(&name, request.prompt)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
