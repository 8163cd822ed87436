//! `cleanup.expired` handler (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use browsergrid_core::ports::outbound::{HandlerOutcome, MetadataStorePort, Task};

use super::{decode_payload, TaskHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupExpiredPayload {
    pub max_age_hours: u32,
}

pub struct CleanupExpiredHandler {
    store: Arc<dyn MetadataStorePort>,
}

impl CleanupExpiredHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for CleanupExpiredHandler {
    async fn handle(&self, task: &Task) -> HandlerOutcome {
        let payload: CleanupExpiredPayload = match decode_payload(task) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };

        let max_age = chrono::Duration::hours(i64::from(payload.max_age_hours));
        match self.store.cleanup_expired(max_age).await {
            Ok(count) => {
                tracing::info!(count, max_age_hours = payload.max_age_hours, "cleanup.expired complete");
                HandlerOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(error = %e, "cleanup.expired: transient store error");
                HandlerOutcome::Retry(crate::retry::backoff(task.attempt))
            }
        }
    }
}
