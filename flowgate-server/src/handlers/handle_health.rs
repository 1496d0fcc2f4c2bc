use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::infra::app_context::AppContext;

pub async fn health_handler(State(context): State<AppContext>) -> (StatusCode, Json<Value>) {
    let mut health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": context.backend().as_str(),
        "checks": {}
    });

    let mut is_unhealthy = false;

    match context.queue().depth().await {
        Ok(depth) => {
            health_status["checks"]["queue"] = json!({
                "status": "healthy",
                "key": context.queue().key(),
                "depth": depth,
            });
        }
        Err(e) => {
            health_status["checks"]["queue"] = json!({
                "status": "unhealthy",
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    // A degraded relay still serves same-process clients, so it does not
    // fail the check.
    health_status["checks"]["bus"] = json!({
        "process_id": context.bus().process_id().to_string(),
        "relay": context.bus().state().as_str(),
        "connections": context.bus().connection_count(),
    });

    if is_unhealthy {
        health_status["status"] = json!("unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    } else {
        (StatusCode::OK, Json(health_status))
    }
}
