//! `session.health-check` handler (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use browsergrid_core::domain::state_machine::{apply, SessionEventKind};
use browsergrid_core::ports::outbound::{HandlerOutcome, MetadataStorePort, ProviderDriverPort, StoreError, Task};

use super::{decode_payload, TaskHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealthCheckPayload {
    pub session_id: Uuid,
}

pub struct SessionHealthCheckHandler {
    store: Arc<dyn MetadataStorePort>,
    provider: Arc<dyn ProviderDriverPort>,
}

impl SessionHealthCheckHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>, provider: Arc<dyn ProviderDriverPort>) -> Self {
        Self { store, provider }
    }
}

#[async_trait]
impl TaskHandler for SessionHealthCheckHandler {
    async fn handle(&self, task: &Task) -> HandlerOutcome {
        let payload: SessionHealthCheckPayload = match decode_payload(task) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };

        let session = match self.store.get_session(payload.session_id).await {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(session_id = %payload.session_id, "session.health-check: session no longer exists");
                return HandlerOutcome::Fail;
            }
            Err(e) => {
                tracing::warn!(error = %e, "session.health-check: transient store error");
                return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
            }
        };

        match self.provider.health(&session).await {
            Ok(()) => HandlerOutcome::Ok,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "session.health-check: probe failed");
                if task.attempt < task.max_retry {
                    return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
                }

                let outcome = apply(session.status, SessionEventKind::ContainerCrashed);
                if let Err(e) = self
                    .store
                    .append_event(session.id, SessionEventKind::ContainerCrashed, serde_json::Value::Null)
                    .await
                {
                    tracing::error!(session_id = %session.id, error = %e, "session.health-check: failed to record container_crashed");
                }
                if outcome.changed {
                    let mut session = session;
                    session.status = outcome.next_status;
                    session.updated_at = chrono::Utc::now();
                    if let Err(e) = self.store.update_session(session).await {
                        tracing::error!(error = %e, "session.health-check: failed to persist crashed status");
                    }
                }
                HandlerOutcome::Fail
            }
        }
    }
}
