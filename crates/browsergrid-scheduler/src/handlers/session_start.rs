//! `session.start` handler (spec.md §4.5).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use async_trait::async_trait;
use browsergrid_core::domain::state_machine::{apply, SessionEventKind};
use browsergrid_core::ports::outbound::{
    HandlerOutcome, MetadataStorePort, ProviderDriverPort, SessionEndpointRegistrarPort, StoreError, Task,
};

use super::{decode_payload, TaskHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartPayload {
    pub session_id: Uuid,
    pub pool_id: Option<Uuid>,
    pub max_duration_seconds: u32,
    pub queue: String,
}

pub struct SessionStartHandler {
    store: Arc<dyn MetadataStorePort>,
    provider: Arc<dyn ProviderDriverPort>,
    registrar: Option<Arc<dyn SessionEndpointRegistrarPort>>,
}

impl SessionStartHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>, provider: Arc<dyn ProviderDriverPort>) -> Self {
        Self { store, provider, registrar: None }
    }

    /// Attaches the CDP Multiplexer registrar so a successful `start`
    /// dials the upstream browser and opens `/devtools/:session_id` for
    /// clients (spec.md §4.7). Handlers built without one (e.g. unit
    /// tests with a mock provider) simply skip mux wiring.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn SessionEndpointRegistrarPort>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    async fn apply_event(&self, session_id: Uuid, kind: SessionEventKind) -> Result<(), StoreError> {
        let mut session = self.store.get_session(session_id).await?;
        let outcome = apply(session.status, kind);
        self.store.append_event(session_id, kind, serde_json::Value::Null).await?;
        if outcome.changed {
            session.status = outcome.next_status;
            session.updated_at = chrono::Utc::now();
            self.store.update_session(session).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for SessionStartHandler {
    async fn handle(&self, task: &Task) -> HandlerOutcome {
        let payload: SessionStartPayload = match decode_payload(task) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };

        let session = match self.store.get_session(payload.session_id).await {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(session_id = %payload.session_id, "session.start: session no longer exists");
                return HandlerOutcome::Fail;
            }
            Err(e) => {
                tracing::warn!(error = %e, "session.start: transient store error");
                return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
            }
        };

        match self.provider.start(&session).await {
            Ok(endpoints) => {
                let mut updated = session.clone();
                updated.ws_endpoint = Some(endpoints.ws_endpoint.clone());
                updated.live_url = Some(endpoints.live_url.clone());
                updated.updated_at = chrono::Utc::now();
                if let Err(e) = self.store.update_session(updated).await {
                    tracing::warn!(session_id = %session.id, error = %e, "session.start: failed to persist endpoints");
                    return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
                }

                if let Some(registrar) = &self.registrar {
                    if let Err(e) = registrar
                        .connect_session(session.id, &endpoints.ws_endpoint, &endpoints.live_url)
                        .await
                    {
                        tracing::warn!(session_id = %session.id, error = %e, "session.start: failed to attach CDP mux");
                        return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
                    }
                }

                for kind in [SessionEventKind::ContainerStarted, SessionEventKind::BrowserStarted] {
                    if let Err(e) = self.apply_event(session.id, kind).await {
                        tracing::warn!(session_id = %session.id, error = %e, "session.start: failed to append lifecycle event");
                        return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
                    }
                }
                let ready_event = if session.is_pooled {
                    SessionEventKind::SessionAvailable
                } else {
                    SessionEventKind::SessionReady
                };
                // `available_size` is owned by the Reconciler (spec.md §3
                // "Lifecycle & ownership"), not mutated here; the next
                // tick's recount picks this session up.
                if let Err(e) = self.apply_event(session.id, ready_event).await {
                    tracing::warn!(session_id = %session.id, error = %e, "session.start: failed to mark session ready");
                    return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
                }

                HandlerOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "session.start: provider failed");
                if let Err(store_err) = self.apply_event(session.id, SessionEventKind::StartupFailed).await {
                    tracing::error!(session_id = %session.id, error = %store_err, "session.start: failed to record startup_failed");
                }
                if task.attempt >= task.max_retry {
                    HandlerOutcome::Fail
                } else {
                    HandlerOutcome::Retry(crate::retry::backoff(task.attempt))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browsergrid_core::domain::entities::Session;
    use browsergrid_core::ports::outbound::{ProviderMetricsSample, ProviderResult, TaskKind};
    use browsergrid_store::MemoryStore;

    struct MockProvider {
        should_fail: bool,
    }

    #[async_trait]
    impl ProviderDriverPort for MockProvider {
        fn provider_name(&self) -> &str {
            "mock"
        }

        async fn start(
            &self,
            _session: &Session,
        ) -> ProviderResult<browsergrid_core::ports::outbound::ProvisionedEndpoints> {
            if self.should_fail {
                return Err(browsergrid_core::ports::outbound::ProviderError::StartupFailed("boom".into()));
            }
            Ok(browsergrid_core::ports::outbound::ProvisionedEndpoints {
                ws_endpoint: "ws://127.0.0.1:9222/devtools/browser/abc".into(),
                live_url: "http://127.0.0.1:9222".into(),
            })
        }

        async fn stop(&self, _session: &Session) -> ProviderResult<()> {
            Ok(())
        }

        async fn health(&self, _session: &Session) -> ProviderResult<()> {
            Ok(())
        }

        async fn metrics(&self, _session: &Session) -> ProviderResult<ProviderMetricsSample> {
            Ok(ProviderMetricsSample::default())
        }
    }

    fn task_for(session_id: Uuid, attempt: u32, max_retry: u32) -> Task {
        Task {
            id: Uuid::new_v4(),
            queue: "local".into(),
            kind: TaskKind::SessionStart,
            payload: serde_json::json!({
                "session_id": session_id,
                "pool_id": serde_json::Value::Null,
                "max_duration_seconds": 3600,
                "queue": "local",
            }),
            attempt,
            max_retry,
        }
    }

    #[tokio::test]
    async fn successful_start_marks_non_pooled_session_ready() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let session = store.create_session(Session::new("local", false)).await.unwrap();
        let handler = SessionStartHandler::new(store.clone(), Arc::new(MockProvider { should_fail: false }));

        let outcome = handler.handle(&task_for(session.id, 0, 3)).await;
        assert!(matches!(outcome, HandlerOutcome::Ok));

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.status, browsergrid_core::domain::state_machine::SessionStatus::Running);
        assert!(updated.ws_endpoint.is_some());
    }

    #[tokio::test]
    async fn successful_start_marks_pooled_session_available() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let session = store.create_session(Session::new("local", true)).await.unwrap();
        let handler = SessionStartHandler::new(store.clone(), Arc::new(MockProvider { should_fail: false }));

        let outcome = handler.handle(&task_for(session.id, 0, 3)).await;
        assert!(matches!(outcome, HandlerOutcome::Ok));

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.status, browsergrid_core::domain::state_machine::SessionStatus::Available);
    }

    #[tokio::test]
    async fn provider_failure_retries_until_attempts_exhausted() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let session = store.create_session(Session::new("local", false)).await.unwrap();
        let handler = SessionStartHandler::new(store.clone(), Arc::new(MockProvider { should_fail: true }));

        let outcome = handler.handle(&task_for(session.id, 0, 3)).await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));

        let outcome = handler.handle(&task_for(session.id, 3, 3)).await;
        assert!(matches!(outcome, HandlerOutcome::Fail));

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.status, browsergrid_core::domain::state_machine::SessionStatus::Failed);
    }

    #[tokio::test]
    async fn missing_session_fails_without_retry() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let handler = SessionStartHandler::new(store, Arc::new(MockProvider { should_fail: false }));
        let outcome = handler.handle(&task_for(Uuid::new_v4(), 0, 3)).await;
        assert!(matches!(outcome, HandlerOutcome::Fail));
    }
}
