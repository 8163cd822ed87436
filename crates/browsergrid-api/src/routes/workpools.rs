//! `/workpools` routes (spec.md §6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use browsergrid_core::domain::entities::{ProviderKind, QueueStrategy, WorkPool};
use browsergrid_core::domain::state_machine::SessionStatus;
use browsergrid_core::ports::outbound::{EnqueueOptions, QueueStats, TaskKind};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkPoolRequest {
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub min_size: u32,
    pub max_concurrency: u32,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWorkPoolRequest>,
) -> Result<Json<WorkPool>, ApiError> {
    let pool = WorkPool::new(req.name, req.provider, req.min_size, req.max_concurrency)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let pool = state.store.create_pool(pool).await?;
    Ok(Json(pool))
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<WorkPool>>, ApiError> {
    let pools = state.store.list_pools().await?;
    Ok(Json(pools))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<WorkPool>, ApiError> {
    let pool = state.store.get_pool(id).await?;
    Ok(Json(pool))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkPoolRequest {
    pub name: Option<String>,
    pub min_size: Option<u32>,
    pub max_concurrency: Option<u32>,
    pub paused: Option<bool>,
    pub auto_scale: Option<bool>,
    pub default_image: Option<String>,
    pub default_env: Option<HashMap<String, String>>,
    pub max_idle_seconds: Option<u32>,
    pub max_session_duration_seconds: Option<u32>,
    pub queue_strategy: Option<QueueStrategy>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWorkPoolRequest>,
) -> Result<Json<WorkPool>, ApiError> {
    let mut pool = state.store.get_pool(id).await?;
    if let Some(name) = req.name {
        pool.name = name;
    }
    if let Some(min_size) = req.min_size {
        pool.min_size = min_size;
    }
    if let Some(max_concurrency) = req.max_concurrency {
        pool.max_concurrency = max_concurrency;
    }
    if pool.min_size > pool.max_concurrency {
        return Err(ApiError::bad_request("min_size must be <= max_concurrency"));
    }
    if let Some(paused) = req.paused {
        pool.paused = paused;
    }
    if let Some(auto_scale) = req.auto_scale {
        pool.auto_scale = auto_scale;
    }
    if let Some(default_image) = req.default_image {
        pool.default_image = Some(default_image);
    }
    if let Some(default_env) = req.default_env {
        pool.default_env = default_env;
    }
    if let Some(max_idle_seconds) = req.max_idle_seconds {
        pool.max_idle_seconds = max_idle_seconds;
    }
    if let Some(max_session_duration_seconds) = req.max_session_duration_seconds {
        pool.max_session_duration_seconds = max_session_duration_seconds;
    }
    if let Some(queue_strategy) = req.queue_strategy {
        pool.queue_strategy = queue_strategy;
    }
    pool.updated_at = chrono::Utc::now();

    let pool = state.store.update_pool(pool).await?;
    Ok(Json(pool))
}

pub async fn remove(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<()>, ApiError> {
    state.store.delete_pool(id).await?;
    Ok(Json(()))
}

/// Pauses intake: new `pool.scale` ticks stop creating sessions, existing
/// sessions run to completion (spec.md §4.6's `paused` flag short-circuits
/// the reconciler's deficit computation).
pub async fn drain(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<WorkPool>, ApiError> {
    let mut pool = state.store.get_pool(id).await?;
    pool.paused = true;
    pool.updated_at = chrono::Utc::now();
    let pool = state.store.update_pool(pool).await?;
    Ok(Json(pool))
}

#[derive(Debug, Deserialize)]
pub struct ScalePoolRequest {
    pub desired: u32,
}

#[derive(Debug, Serialize)]
pub struct ScalePoolResponse {
    pub task_id: Uuid,
}

pub async fn scale(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScalePoolRequest>,
) -> Result<Json<ScalePoolResponse>, ApiError> {
    let pool = state.store.get_pool(id).await?;
    let payload = serde_json::json!({ "pool_id": pool.id, "desired": req.desired });
    let options = EnqueueOptions {
        unique_key: Some(format!("scale:{}", pool.id)),
        ..Default::default()
    };
    let task_id = state.broker.enqueue(pool.queue_name(), TaskKind::PoolScale, payload, options).await?;
    Ok(Json(ScalePoolResponse { task_id }))
}

#[derive(Debug, Serialize)]
pub struct PoolStatsResponse {
    pub by_status: HashMap<SessionStatus, u32>,
    pub queue: QueueStats,
}

pub async fn stats(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<PoolStatsResponse>, ApiError> {
    let pool = state.store.get_pool(id).await?;
    let by_status = state.store.count_sessions_by_status(id).await?;
    let queue = state.broker.inspect(pool.queue_name()).await?;
    Ok(Json(PoolStatsResponse { by_status, queue }))
}
