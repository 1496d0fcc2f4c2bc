use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    handlers::{
        handle_locks::{
            acquire_lock_handler, extend_lock_handler, force_release_handler,
            get_lock_handler, release_lock_handler,
        },
        handle_queue::{
            dequeue_handler, enqueue_handler, position_handler, queue_snapshot_handler,
        },
    },
    infra::app_context::AppContext,
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppContext> {
    Router::new()
        // Leases
        .route(
            "/locks/{lock_name}",
            get(get_lock_handler).delete(force_release_handler),
        )
        .route("/locks/{lock_name}/acquire", post(acquire_lock_handler))
        .route("/locks/{lock_name}/release", post(release_lock_handler))
        .route("/locks/{lock_name}/extend", post(extend_lock_handler))
        // Admission queue
        .route("/queue", get(queue_snapshot_handler).post(enqueue_handler))
        .route(
            "/queue/{item_id}",
            get(position_handler).delete(dequeue_handler),
        )
}
