//! `/workers` routes (spec.md §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use browsergrid_core::domain::entities::Worker;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListWorkersQuery {
    pub pool_id: Uuid,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListWorkersQuery>,
) -> Result<Json<Vec<Worker>>, ApiError> {
    let workers = state.store.list_workers_for_pool(query.pool_id).await?;
    Ok(Json(workers))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Worker>, ApiError> {
    let worker = state.store.get_worker(id).await?;
    Ok(Json(worker))
}

pub async fn remove(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<()>, ApiError> {
    state.store.delete_worker(id).await?;
    Ok(Json(()))
}

pub async fn heartbeat(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.record_heartbeat(chrono::Utc::now());
    let worker = state.store.update_worker(worker).await?;
    Ok(Json(worker))
}

#[derive(Debug, Deserialize)]
pub struct PauseWorkerRequest {
    pub paused: bool,
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PauseWorkerRequest>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.paused = req.paused;
    let worker = state.store.update_worker(worker).await?;
    Ok(Json(worker))
}
