//! Sync routes
//!
//! Read and operate sync records. Triggering answers `202 Accepted`; the run itself
//! continues in the background and is observed through `GET /syncs/:id`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use super::commands::{
    cancel_sync, clear_failures, restart_processing, trigger_sync, CancelSyncCommand,
    ClearFailuresCommand, RestartProcessingCommand, TriggerSyncCommand,
};
use super::queries::{get_sync, list_syncs, GetSyncQuery, ListSyncsQuery};
use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::ingest::SyncService;

pub fn syncs_routes() -> Router<SyncService> {
    Router::new()
        .route("/syncs", get(list_syncs_handler).post(trigger_sync_handler))
        .route("/syncs/:id", get(get_sync_handler))
        .route("/syncs/:id/cancel", post(cancel_sync_handler))
        .route("/syncs/:id/restart", post(restart_processing_handler))
        .route("/syncs/:id/failures", delete(clear_failures_handler))
}

/// GET /syncs?sync_type=oracle_cards&status=failed&page=1&per_page=20
async fn list_syncs_handler(
    State(service): State<SyncService>,
    Query(query): Query<ListSyncsQuery>,
) -> Result<Response, AppError> {
    let response = list_syncs::handle(&service, query).await?;
    Ok(ApiResponse::success(response).into_response())
}

/// GET /syncs/:id
async fn get_sync_handler(
    State(service): State<SyncService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = get_sync::handle(&service, GetSyncQuery { id }).await?;
    Ok(ApiResponse::success(view).into_response())
}

/// POST /syncs `{"sync_type": "oracle_cards"}`
#[tracing::instrument(skip(service, command), fields(sync_type = %command.sync_type))]
async fn trigger_sync_handler(
    State(service): State<SyncService>,
    Json(command): Json<TriggerSyncCommand>,
) -> Result<Response, AppError> {
    let view = trigger_sync::handle(&service, command).await?;

    tracing::info!(sync_id = %view.record.id, "Sync triggered via API");

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(view))).into_response())
}

/// POST /syncs/:id/cancel
#[tracing::instrument(skip(service))]
async fn cancel_sync_handler(
    State(service): State<SyncService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = cancel_sync::handle(&service, CancelSyncCommand { id }).await?;
    Ok(ApiResponse::success(view).into_response())
}

/// POST /syncs/:id/restart
#[tracing::instrument(skip(service))]
async fn restart_processing_handler(
    State(service): State<SyncService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = restart_processing::handle(&service, RestartProcessingCommand { id }).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(view))).into_response())
}

/// DELETE /syncs/:id/failures
#[tracing::instrument(skip(service))]
async fn clear_failures_handler(
    State(service): State<SyncService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = clear_failures::handle(&service, ClearFailuresCommand { id }).await?;
    Ok(ApiResponse::success(view).into_response())
}
