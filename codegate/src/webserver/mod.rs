//! The HTTP surface: provider-prefixed proxy routes plus the mux entry on
//! the gateway port, and the management API on the dashboard port.

pub mod audit;
pub mod completions;
pub mod health;
pub mod provider_endpoints;
pub mod types;
pub mod workspaces;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Extension;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::application::application::Application;

pub type Router<S = ()> = axum::Router<S>;

/// Routes served on the clear provider-proxy port.
pub fn gateway_router(app: Application) -> Router {
    completions::router()
        .layer(Extension(app))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        // streams of code can get big, 20 MB is the same bound everywhere
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
}

/// Routes served on the dashboard/management port.
pub fn management_router(app: Application) -> Router {
    let api = Router::new()
        .nest("/provider-endpoints", provider_endpoints::router())
        .nest("/workspaces", workspaces::router())
        .merge(audit::router())
        .route("/health", get(health::health));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health::health))
        .layer(Extension(app))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::max(4 * 1024 * 1024))
}
