//! Pool Claim Protocol (spec.md §4.4).
//!
//! The claim/release algorithms require row-locking, single-transaction
//! semantics that only a real store adapter can provide, so the bulk of
//! the protocol lives behind `MetadataStorePort::atomic_claim` /
//! `release`. `ClaimService` is the thin, store-agnostic façade the rest
//! of the control plane (the HTTP API, the scheduler) calls through,
//! keeping "claim a pooled session" a single call site regardless of
//! which store backend is wired in.

use std::sync::Arc;
use uuid::Uuid;

use crate::ports::outbound::{ClaimOutcome, MetadataStorePort, StoreResult};

pub struct ClaimService {
    store: Arc<dyn MetadataStorePort>,
}

impl ClaimService {
    pub fn new(store: Arc<dyn MetadataStorePort>) -> Self {
        Self { store }
    }

    /// Attempts to claim one available session from `pool_id` on behalf
    /// of `caller`. Returns `None` if the pool currently has no available
    /// sessions (spec.md §4.4 step 1: "If none, return `empty`").
    pub async fn claim(
        &self,
        pool_id: Uuid,
        caller: &str,
    ) -> StoreResult<Option<crate::domain::entities::Session>> {
        match self.store.atomic_claim(pool_id, caller).await? {
            ClaimOutcome::Claimed(session) => Ok(Some(session)),
            ClaimOutcome::Empty => Ok(None),
        }
    }

    /// Releases a previously claimed session. Rejects (via
    /// `StoreError::Conflict`, surfaced by the adapter) if `caller`
    /// doesn't match `claimed_by` — release-authorization is always
    /// enforced (spec.md §9c).
    pub async fn release(
        &self,
        session_id: Uuid,
        caller: &str,
    ) -> StoreResult<crate::domain::entities::Session> {
        self.store.release(session_id, caller).await
    }

    /// Expires stale `available` sessions in `pool_id` (spec.md §4.4
    /// "Cleanup").
    pub async fn cleanup_stale(
        &self,
        pool_id: Uuid,
        max_idle: chrono::Duration,
    ) -> StoreResult<u64> {
        self.store.cleanup_expired_available(pool_id, max_idle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ProviderKind, Session, WorkPool};
    use crate::domain::state_machine::{SessionEventKind, SessionStatus};
    use crate::ports::outbound::{Pagination, SessionFilter, StoreError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal in-test double: a single-session store just exercising
    /// `ClaimService`'s dispatch, not the real locking semantics (those
    /// are covered in `browsergrid-store`'s own test suite).
    struct OneSessionStore {
        session: Mutex<Option<Session>>,
    }

    #[async_trait]
    impl MetadataStorePort for OneSessionStore {
        async fn create_session(&self, s: Session) -> StoreResult<Session> {
            Ok(s)
        }
        async fn get_session(&self, _id: Uuid) -> StoreResult<Session> {
            self.session.lock().unwrap().clone().ok_or(StoreError::NotFound("x".into()))
        }
        async fn update_session(&self, s: Session) -> StoreResult<Session> {
            Ok(s)
        }
        async fn delete_session(&self, _id: Uuid) -> StoreResult<()> {
            Ok(())
        }
        async fn list_sessions(&self, _f: SessionFilter, _p: Pagination) -> StoreResult<Vec<Session>> {
            Ok(vec![])
        }
        async fn append_event(
            &self,
            session_id: Uuid,
            kind: SessionEventKind,
            data: serde_json::Value,
        ) -> StoreResult<crate::domain::entities::SessionEvent> {
            Ok(crate::domain::entities::SessionEvent::new(session_id, kind, data, 0))
        }
        async fn list_events(&self, _session_id: Uuid) -> StoreResult<Vec<crate::domain::entities::SessionEvent>> {
            Ok(vec![])
        }
        async fn append_metrics(
            &self,
            m: crate::domain::entities::SessionMetrics,
        ) -> StoreResult<crate::domain::entities::SessionMetrics> {
            Ok(m)
        }
        async fn create_pool(&self, p: WorkPool) -> StoreResult<WorkPool> {
            Ok(p)
        }
        async fn get_pool(&self, _id: Uuid) -> StoreResult<WorkPool> {
            WorkPool::new("p", ProviderKind::Local, 0, 1).map_err(|e| StoreError::Validation(e.to_string()))
        }
        async fn update_pool(&self, p: WorkPool) -> StoreResult<WorkPool> {
            Ok(p)
        }
        async fn delete_pool(&self, _id: Uuid) -> StoreResult<()> {
            Ok(())
        }
        async fn list_pools(&self) -> StoreResult<Vec<WorkPool>> {
            Ok(vec![])
        }
        async fn create_worker(&self, w: crate::domain::entities::Worker) -> StoreResult<crate::domain::entities::Worker> {
            Ok(w)
        }
        async fn get_worker(&self, _id: Uuid) -> StoreResult<crate::domain::entities::Worker> {
            Err(StoreError::NotFound("worker".into()))
        }
        async fn update_worker(&self, w: crate::domain::entities::Worker) -> StoreResult<crate::domain::entities::Worker> {
            Ok(w)
        }
        async fn delete_worker(&self, _id: Uuid) -> StoreResult<()> {
            Ok(())
        }
        async fn list_workers_for_pool(&self, _pool_id: Uuid) -> StoreResult<Vec<crate::domain::entities::Worker>> {
            Ok(vec![])
        }
        async fn count_sessions_by_status(
            &self,
            _pool_id: Uuid,
        ) -> StoreResult<HashMap<SessionStatus, u32>> {
            Ok(HashMap::new())
        }
        async fn atomic_claim(&self, _pool_id: Uuid, claimed_by: &str) -> StoreResult<crate::ports::outbound::ClaimOutcome> {
            let mut guard = self.session.lock().unwrap();
            match guard.take() {
                Some(mut s) if s.status == SessionStatus::Available => {
                    s.status = SessionStatus::Claimed;
                    s.claimed_by = Some(claimed_by.to_string());
                    s.claimed_at = Some(chrono::Utc::now());
                    *guard = Some(s.clone());
                    Ok(crate::ports::outbound::ClaimOutcome::Claimed(s))
                }
                other => {
                    *guard = other;
                    Ok(crate::ports::outbound::ClaimOutcome::Empty)
                }
            }
        }
        async fn release(&self, _session_id: Uuid, caller: &str) -> StoreResult<Session> {
            let mut guard = self.session.lock().unwrap();
            let mut s = guard.take().ok_or(StoreError::NotFound("session".into()))?;
            if s.claimed_by.as_deref() != Some(caller) {
                *guard = Some(s);
                return Err(StoreError::Conflict("caller mismatch".into()));
            }
            s.status = SessionStatus::Available;
            s.claimed_by = None;
            s.claimed_at = None;
            *guard = Some(s.clone());
            Ok(s)
        }
        async fn mark_worker_sessions_failed(&self, _worker_id: Uuid) -> StoreResult<u64> {
            Ok(0)
        }
        async fn cleanup_expired(&self, _max_age: chrono::Duration) -> StoreResult<u64> {
            Ok(0)
        }
        async fn cleanup_expired_available(&self, _pool_id: Uuid, _max_idle: chrono::Duration) -> StoreResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn claim_returns_none_when_empty() {
        let store = Arc::new(OneSessionStore { session: Mutex::new(None) });
        let svc = ClaimService::new(store);
        assert!(svc.claim(Uuid::new_v4(), "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_then_release_round_trips() {
        let mut session = Session::new("local", true);
        session.status = SessionStatus::Available;
        let store = Arc::new(OneSessionStore { session: Mutex::new(Some(session.clone())) });
        let svc = ClaimService::new(store);

        let claimed = svc.claim(session.work_pool_id.unwrap_or_default(), "caller-a").await.unwrap().unwrap();
        assert_eq!(claimed.status, SessionStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("caller-a"));

        let released = svc.release(claimed.id, "caller-a").await.unwrap();
        assert_eq!(released.status, SessionStatus::Available);
        assert!(released.claimed_by.is_none());
    }

    #[tokio::test]
    async fn release_rejects_wrong_caller() {
        let mut session = Session::new("local", true);
        session.status = SessionStatus::Available;
        let store = Arc::new(OneSessionStore { session: Mutex::new(Some(session.clone())) });
        let svc = ClaimService::new(store);

        let claimed = svc.claim(Uuid::new_v4(), "caller-a").await.unwrap().unwrap();
        let err = svc.release(claimed.id, "caller-b").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
