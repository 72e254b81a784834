use axum::Extension;

use crate::application::application::Application;

/// Liveness probe.
pub async fn health(Extension(_app): Extension<Application>) {}
