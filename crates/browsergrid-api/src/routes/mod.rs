//! Route modules, one per resource family (spec.md §6).

mod health;
mod sessions;
mod workers;
mod workpools;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth::require_api_key;
use crate::state::AppState;

/// Builds the `/api/v1` control-plane router plus the unauthenticated
/// `/health` route.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let api = Router::new()
        .route("/sessions", get(sessions::list).post(sessions::create))
        .route("/sessions/:id", get(sessions::get_one))
        .route("/sessions/:id/events", get(sessions::list_events).post(sessions::append_event))
        .route("/sessions/:id/metrics", post(sessions::append_metrics))
        .route("/workers", get(workers::list))
        .route("/workers/:id", get(workers::get_one).delete(workers::remove))
        .route("/workers/:id/heartbeat", post(workers::heartbeat))
        .route("/workers/:id/pause", post(workers::pause))
        .route("/workpools", get(workpools::list).post(workpools::create))
        .route("/workpools/:id", get(workpools::get_one).patch(workpools::update).delete(workpools::remove))
        .route("/workpools/:id/drain", post(workpools::drain))
        .route("/workpools/:id/scale", post(workpools::scale))
        .route("/workpools/:id/stats", get(workpools::stats));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

#[cfg(test)]
mod route_wiring_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use browsergrid_broker::MemoryBroker;
    use browsergrid_store::MemoryStore;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store = Arc::new(MemoryStore::default());
        AppState::new(store.clone(), store, Arc::new(MemoryBroker::default()), None)
    }

    #[tokio::test]
    async fn health_bypasses_auth_even_with_key_configured() {
        let store = Arc::new(MemoryStore::default());
        let state = AppState::new(store.clone(), store, Arc::new(MemoryBroker::default()), Some("secret".into()));
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_key_is_unauthorized() {
        let store = Arc::new(MemoryStore::default());
        let state = AppState::new(store.clone(), store, Arc::new(MemoryBroker::default()), Some("secret".into()));
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/api/v1/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_configured_key_allows_any_request() {
        let router = create_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/api/v1/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
