pub mod v1;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{health_handler, websocket_handler},
    infra::app_context::AppContext,
};

/// Create the main API router with all versions
pub fn create_api_router() -> Router<AppContext> {
    Router::new().nest("/api/v1", v1::create_v1_router())
}

pub fn create_app(context: AppContext) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ws", get(websocket_handler))
        .merge(create_api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}
