//! Shared webserver plumbing: the error envelope every handler returns and
//! the marker trait for response payloads.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DbError;
use crate::pipeline::types::FailureKind;
use crate::workspace::registry::WorkspaceError;

/// Marker for response payloads, keeps handler signatures tidy.
pub trait ApiResponse: Serialize {}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn from_failure(kind: FailureKind, detail: String) -> Self {
        let status = match kind {
            FailureKind::Route => StatusCode::BAD_REQUEST,
            FailureKind::Auth => StatusCode::UNAUTHORIZED,
            FailureKind::Upstream => StatusCode::BAD_GATEWAY,
            FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(serde_json::json!({
            "error": { "message": self.message }
        }));
        (self.status, payload).into_response()
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        let status = match &err {
            WorkspaceError::NotFound(_) | WorkspaceError::EndpointNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            WorkspaceError::NameTaken(_)
            | WorkspaceError::EmptyName
            | WorkspaceError::DefaultImmutable
            | WorkspaceError::Archived(_)
            | WorkspaceError::NotArchived(_)
            | WorkspaceError::EndpointInUse(_)
            | WorkspaceError::Rule(_) => StatusCode::BAD_REQUEST,
            WorkspaceError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::internal(err.to_string())
    }
}
