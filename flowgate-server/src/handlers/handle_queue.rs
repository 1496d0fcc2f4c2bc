use axum::{
    Json,
    extract::{Path, State},
};
use flowgate_core::queue::QueueEntry;
use serde::{Deserialize, Serialize};

use crate::infra::{
    app_context::AppContext,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub item_id: String,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub item_id: String,
    pub position: u64,
    pub queue_depth: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct DequeueResponse {
    pub removed: bool,
}

pub async fn enqueue_handler(
    State(context): State<AppContext>,
    Json(body): Json<EnqueueRequest>,
) -> AppResult<Json<PositionResponse>> {
    let position = context.queue().enqueue(&body.item_id).await?;
    let queue_depth = context.queue().depth().await?;
    Ok(Json(PositionResponse {
        item_id: body.item_id,
        position,
        queue_depth,
    }))
}

pub async fn position_handler(
    State(context): State<AppContext>,
    Path(item_id): Path<String>,
) -> AppResult<Json<PositionResponse>> {
    let Some(position) = context.queue().position(&item_id).await? else {
        return Err(AppError::not_found(format!("{item_id} is not queued")));
    };
    let queue_depth = context.queue().depth().await?;
    Ok(Json(PositionResponse {
        item_id,
        position,
        queue_depth,
    }))
}

pub async fn dequeue_handler(
    State(context): State<AppContext>,
    Path(item_id): Path<String>,
) -> AppResult<Json<DequeueResponse>> {
    let removed = context.queue().dequeue(&item_id).await?;
    Ok(Json(DequeueResponse { removed }))
}

pub async fn queue_snapshot_handler(
    State(context): State<AppContext>,
) -> AppResult<Json<QueueSnapshot>> {
    let entries = context.queue().entries().await?;
    Ok(Json(QueueSnapshot {
        depth: entries.len(),
        entries,
    }))
}
