//! `pool.scale` handler (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use browsergrid_core::domain::entities::Session;
use browsergrid_core::ports::outbound::{
    EnqueueOptions, HandlerOutcome, MetadataStorePort, StoreError, Task, TaskBrokerPort, TaskKind,
};

use super::{decode_payload, TaskHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolScalePayload {
    pub pool_id: Uuid,
    pub desired: u32,
}

pub struct PoolScaleHandler {
    store: Arc<dyn MetadataStorePort>,
    broker: Arc<dyn TaskBrokerPort>,
}

impl PoolScaleHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>, broker: Arc<dyn TaskBrokerPort>) -> Self {
        Self { store, broker }
    }
}

#[async_trait]
impl TaskHandler for PoolScaleHandler {
    async fn handle(&self, task: &Task) -> HandlerOutcome {
        let payload: PoolScalePayload = match decode_payload(task) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };

        let pool = match self.store.get_pool(payload.pool_id).await {
            Ok(pool) => pool,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(pool_id = %payload.pool_id, "pool.scale: pool no longer exists");
                return HandlerOutcome::Fail;
            }
            Err(e) => {
                tracing::warn!(pool_id = %payload.pool_id, error = %e, "pool.scale: transient store error");
                return HandlerOutcome::Retry(crate::retry::backoff(task.attempt));
            }
        };

        let mut created = 0u32;
        let mut failed = 0u32;
        for _ in 0..payload.desired {
            let mut session = Session::new(pool.provider.to_string(), true);
            session.work_pool_id = Some(pool.id);
            session.environment = pool.default_env.clone();

            let session = match self.store.create_session(session).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(pool_id = %pool.id, error = %e, "pool.scale: failed to create session, skipping");
                    failed += 1;
                    continue;
                }
            };

            let start_payload = serde_json::json!({
                "session_id": session.id,
                "pool_id": pool.id,
                "max_duration_seconds": pool.max_session_duration_seconds,
                "queue": pool.queue_name(),
            });
            if let Err(e) = self
                .broker
                .enqueue(pool.queue_name(), TaskKind::SessionStart, start_payload, EnqueueOptions::default())
                .await
            {
                tracing::warn!(session_id = %session.id, error = %e, "pool.scale: failed to enqueue session.start");
                failed += 1;
                continue;
            }
            created += 1;
        }

        tracing::info!(pool_id = %pool.id, created, failed, "pool.scale complete");
        HandlerOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browsergrid_broker::MemoryBroker;
    use browsergrid_core::domain::entities::{ProviderKind, WorkPool};
    use browsergrid_store::MemoryStore;

    fn task_for(pool_id: Uuid, desired: u32) -> Task {
        Task {
            id: Uuid::new_v4(),
            queue: "local".into(),
            kind: TaskKind::PoolScale,
            payload: serde_json::json!({ "pool_id": pool_id, "desired": desired }),
            attempt: 0,
            max_retry: 3,
        }
    }

    #[tokio::test]
    async fn creates_desired_sessions_and_enqueues_start_tasks() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let broker: Arc<dyn TaskBrokerPort> = Arc::new(MemoryBroker::default());
        let pool = store
            .create_pool(WorkPool::new("p", ProviderKind::Local, 0, 10).unwrap())
            .await
            .unwrap();

        let handler = PoolScaleHandler::new(store.clone(), broker.clone());
        let outcome = handler.handle(&task_for(pool.id, 2)).await;
        assert!(matches!(outcome, HandlerOutcome::Ok));

        let stats = broker.inspect(pool.queue_name()).await.unwrap();
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn missing_pool_fails_without_retry() {
        let store: Arc<dyn MetadataStorePort> = Arc::new(MemoryStore::default());
        let broker: Arc<dyn TaskBrokerPort> = Arc::new(MemoryBroker::default());
        let handler = PoolScaleHandler::new(store, broker);
        let outcome = handler.handle(&task_for(Uuid::new_v4(), 1)).await;
        assert!(matches!(outcome, HandlerOutcome::Fail));
    }
}
