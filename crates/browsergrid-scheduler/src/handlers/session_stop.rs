//! `session.stop` handler (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use browsergrid_core::domain::state_machine::{apply, SessionEventKind};
use browsergrid_core::ports::outbound::{
    HandlerOutcome, MetadataStorePort, ProviderDriverPort, SessionEndpointRegistrarPort, StoreError, Task,
};

use super::{decode_payload, TaskHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStopPayload {
    pub session_id: Uuid,
}

pub struct SessionStopHandler {
    store: Arc<dyn MetadataStorePort>,
    provider: Arc<dyn ProviderDriverPort>,
    registrar: Option<Arc<dyn SessionEndpointRegistrarPort>>,
}

impl SessionStopHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>, provider: Arc<dyn ProviderDriverPort>) -> Self {
        Self { store, provider, registrar: None }
    }

    /// See `SessionStartHandler::with_registrar`.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn SessionEndpointRegistrarPort>) -> Self {
        self.registrar = Some(registrar);
        self
    }
}

#[async_trait]
impl TaskHandler for SessionStopHandler {
    async fn handle(&self, task: &Task) -> HandlerOutcome {
        let payload: SessionStopPayload = match decode_payload(task) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };

        let session = match self.store.get_session(payload.session_id).await {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(session_id = %payload.session_id, "session.stop: session no longer exists");
                return HandlerOutcome::Fail;
            }
            Err(e) => {
                tracing::warn!(error = %e, "session.stop: transient store error");
                return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
            }
        };

        if let Err(e) = self.provider.stop(&session).await {
            tracing::warn!(session_id = %session.id, error = %e, "session.stop: provider failed to tear down");
            if task.attempt >= task.max_retry {
                return HandlerOutcome::Fail;
            }
            return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
        }

        if let Some(registrar) = &self.registrar {
            registrar.disconnect_session(session.id).await;
        }

        let outcome = apply(session.status, SessionEventKind::SessionTerminated);
        if let Err(e) = self
            .store
            .append_event(session.id, SessionEventKind::SessionTerminated, serde_json::Value::Null)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %e, "session.stop: failed to append session_terminated");
            return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
        }
        if outcome.changed {
            let mut session = session;
            session.status = outcome.next_status;
            session.updated_at = chrono::Utc::now();
            if let Err(e) = self.store.update_session(session).await {
                tracing::warn!(error = %e, "session.stop: failed to persist terminated status");
                return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
            }
        }

        HandlerOutcome::Ok
    }
}
