use axum::{
    Json,
    extract::{Path, Query, State},
};
use flowgate_core::mutex::{Lock, LockAcquisition, LockRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::infra::{
    app_context::AppContext,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub owner_id: String,
    pub owner_display: String,
    pub operation: String,
    /// Lease length; the configured default when absent
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub granted: bool,
    /// The caller's lease when granted, otherwise the current holder
    pub lock: Option<Lock>,
    pub remaining_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerRequest {
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub owner_id: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ForceReleaseQuery {
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

pub async fn acquire_lock_handler(
    State(context): State<AppContext>,
    Path(lock_name): Path<String>,
    Json(body): Json<AcquireRequest>,
) -> AppResult<Json<AcquireResponse>> {
    let request = LockRequest {
        lock_name: &lock_name,
        owner_id: &body.owner_id,
        owner_display: &body.owner_display,
        operation: &body.operation,
    };
    let outcome = match body.ttl_secs {
        Some(secs) => {
            context
                .mutex()
                .acquire(request, Duration::from_secs(secs))
                .await?
        }
        None => context.mutex().acquire_default(request).await?,
    };

    let now = chrono::Utc::now();
    let (granted, lock) = match outcome {
        LockAcquisition::Granted(lock) => (true, Some(lock)),
        LockAcquisition::Busy(holder) => (false, holder),
    };
    let remaining_secs = lock.as_ref().map(|lock| lock.remaining(now).as_secs());
    Ok(Json(AcquireResponse {
        granted,
        lock,
        remaining_secs,
    }))
}

pub async fn release_lock_handler(
    State(context): State<AppContext>,
    Path(lock_name): Path<String>,
    Json(body): Json<OwnerRequest>,
) -> AppResult<Json<ChangedResponse>> {
    let changed = context.mutex().release(&lock_name, &body.owner_id).await?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn extend_lock_handler(
    State(context): State<AppContext>,
    Path(lock_name): Path<String>,
    Json(body): Json<ExtendRequest>,
) -> AppResult<Json<ChangedResponse>> {
    let changed = context
        .mutex()
        .extend(&lock_name, &body.owner_id, Duration::from_secs(body.ttl_secs))
        .await?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn get_lock_handler(
    State(context): State<AppContext>,
    Path(lock_name): Path<String>,
) -> AppResult<Json<Lock>> {
    context
        .mutex()
        .get_holder(&lock_name)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("lock {lock_name} is free")))
}

pub async fn force_release_handler(
    State(context): State<AppContext>,
    Path(lock_name): Path<String>,
    Query(query): Query<ForceReleaseQuery>,
) -> AppResult<Json<ChangedResponse>> {
    if query.actor.trim().is_empty() {
        return Err(AppError::bad_request("actor is required"));
    }
    let changed = context
        .mutex()
        .force_release(&lock_name, &query.actor)
        .await?;
    Ok(Json(ChangedResponse { changed }))
}
