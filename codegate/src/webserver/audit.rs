//! Audit log readout: prompts and alerts, newest first.

use axum::extract::Query;
use axum::routing::get;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::application::application::Application;
use crate::db::audit::{self, AlertRecord, PromptRecord};

use super::types::Result;
use super::Router;

pub fn router() -> Router {
    Router::new()
        .route("/prompts", get(list_prompts))
        .route("/alerts", get(list_alerts))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

async fn list_prompts(
    Extension(app): Extension<Application>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PromptRecord>>> {
    let prompts = audit::list_prompts(&app.sql, query.limit()).await?;
    Ok(Json(prompts))
}

async fn list_alerts(
    Extension(app): Extension<Application>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AlertRecord>>> {
    let alerts = audit::list_alerts(&app.sql, query.limit()).await?;
    Ok(Json(alerts))
}
