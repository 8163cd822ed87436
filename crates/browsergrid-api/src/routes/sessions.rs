//! `/sessions` routes (spec.md §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use browsergrid_core::domain::entities::{
    BrowserKind, ProviderKind, ProxyConfig, ResourceLimits, ScreenConfig, Session, SessionEvent, SessionMetrics,
};
use browsergrid_core::domain::state_machine::{SessionEventKind, SessionStatus};
use browsergrid_core::ports::outbound::{EnqueueOptions, SessionFilter, TaskKind};

use crate::error::ApiError;
use crate::pagination::PageQuery;
use crate::state::AppState;

fn parse_provider(raw: &str) -> Result<ProviderKind, ApiError> {
    match raw {
        "container" => Ok(ProviderKind::Container),
        "cloud-container" => Ok(ProviderKind::CloudContainer),
        "local" => Ok(ProviderKind::Local),
        other => Err(ApiError::bad_request(format!("unknown provider: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub provider: String,
    #[serde(default)]
    pub browser: Option<BrowserKind>,
    #[serde(default)]
    pub browser_version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub screen: Option<ScreenConfig>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub resources: Option<ResourceLimits>,
    #[serde(default)]
    pub environment: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let filter = SessionFilter {
        status: query.status,
        start_time: query.start_time,
        end_time: query.end_time,
    };
    let page = PageQuery { offset: query.offset, limit: query.limit }.into_pagination();
    let sessions = state.store.list_sessions(filter, page).await?;
    Ok(Json(sessions))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let provider_kind = parse_provider(&req.provider)?;
    let pool = state.pool_lookup.default_pool_for(provider_kind).await?;

    let mut session = Session::new(req.provider.clone(), false);
    if let Some(browser) = req.browser {
        session.browser = browser;
    }
    session.browser_version = req.browser_version;
    if let Some(os) = req.os {
        session.os = os;
    }
    if let Some(headless) = req.headless {
        session.headless = headless;
    }
    if let Some(screen) = req.screen {
        session.screen = screen;
    }
    session.proxy = req.proxy;
    if let Some(resources) = req.resources {
        session.resources = resources;
    }
    session.environment = req.environment.unwrap_or_default();
    session.work_pool_id = Some(pool.id);

    let session = state.store.create_session(session).await?;
    state
        .store
        .append_event(session.id, SessionEventKind::SessionCreated, serde_json::Value::Null)
        .await?;

    let payload = serde_json::json!({
        "session_id": session.id,
        "pool_id": pool.id,
        "max_duration_seconds": pool.max_session_duration_seconds,
        "queue": pool.queue_name(),
    });
    state
        .broker
        .enqueue(pool.queue_name(), TaskKind::SessionStart, payload, EnqueueOptions::default())
        .await?;

    Ok(Json(session))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Session>, ApiError> {
    let session = state.store.get_session(id).await?;
    Ok(Json(session))
}

pub async fn list_events(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Vec<SessionEvent>>, ApiError> {
    let events = state.store.list_events(id).await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct AppendEventRequest {
    pub kind: SessionEventKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub async fn append_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppendEventRequest>,
) -> Result<Json<()>, ApiError> {
    state.store.append_event(id, req.kind, req.data).await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct AppendMetricsRequest {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

pub async fn append_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppendMetricsRequest>,
) -> Result<Json<()>, ApiError> {
    let metrics = SessionMetrics::new(id, req.cpu_percent, req.memory_mb, req.rx_bytes, req.tx_bytes);
    state.store.append_metrics(metrics).await?;
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use browsergrid_broker::MemoryBroker;
    use browsergrid_store::MemoryStore;

    fn state() -> Arc<AppState> {
        let store = Arc::new(MemoryStore::default());
        Arc::new(AppState::new(store.clone(), store, Arc::new(MemoryBroker::default()), None))
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(parse_provider("made-up").is_err());
        assert!(parse_provider("local").is_ok());
    }

    #[tokio::test]
    async fn create_session_provisions_a_default_pool_and_enqueues_start() {
        let state = state();
        let req = CreateSessionRequest {
            provider: "local".into(),
            browser: None,
            browser_version: None,
            os: None,
            headless: None,
            screen: None,
            proxy: None,
            resources: None,
            environment: None,
        };

        let Json(session) = create(State(state.clone()), Json(req)).await.unwrap();
        assert!(session.work_pool_id.is_some());

        let pool = state.store.get_pool(session.work_pool_id.unwrap()).await.unwrap();
        let stats = state.broker.inspect(pool.queue_name()).await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn list_applies_status_filter() {
        let state = state();
        let req = CreateSessionRequest {
            provider: "local".into(),
            browser: None,
            browser_version: None,
            os: None,
            headless: None,
            screen: None,
            proxy: None,
            resources: None,
            environment: None,
        };
        create(State(state.clone()), Json(req)).await.unwrap();

        let query = ListSessionsQuery {
            status: Some(SessionStatus::Completed),
            start_time: None,
            end_time: None,
            offset: None,
            limit: None,
        };
        let Json(sessions) = list(State(state), Query(query)).await.unwrap();
        assert!(sessions.is_empty());
    }
}
