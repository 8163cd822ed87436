//! In-memory `MetadataStorePort` adapter. Used by the test suites of
//! every crate above `browsergrid-core`, and by the CLI's
//! `--store memory` mode for local development without Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use browsergrid_core::domain::entities::{Session, SessionEvent, SessionMetrics, WorkPool, Worker};
use browsergrid_core::domain::state_machine::{SessionEventKind, SessionStatus};
use browsergrid_core::ports::outbound::{
    ClaimOutcome, MetadataStorePort, Pagination, PoolLookupPort, SessionFilter, StoreError, StoreResult,
};
use browsergrid_core::domain::entities::ProviderKind;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    pools: HashMap<Uuid, WorkPool>,
    workers: HashMap<Uuid, Worker>,
    events: HashMap<Uuid, Vec<SessionEvent>>,
    metrics: HashMap<Uuid, Vec<SessionMetrics>>,
}

/// A process-local store backed by `RwLock<HashMap<..>>`. The claim path
/// takes the single write lock for its whole critical section, which is
/// the in-memory equivalent of Postgres's `SELECT ... FOR UPDATE` row
/// lock (spec.md §4.1).
pub struct MemoryStore {
    inner: RwLock<Inner>,
    event_sequence: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            event_sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.event_sequence.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStorePort for MemoryStore {
    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn update_session(&self, session: Session) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&session.id) {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(&id);
        inner.events.remove(&id);
        inner.metrics.remove(&id);
        Ok(())
    }

    async fn list_sessions(&self, filter: SessionFilter, pagination: Pagination) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.start_time.map_or(true, |t| s.created_at >= t))
            .filter(|s| filter.end_time.map_or(true, |t| s.created_at <= t))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        let start = pagination.offset as usize;
        let end = start.saturating_add(pagination.limit as usize);
        Ok(sessions.into_iter().skip(start).take(end.saturating_sub(start)).collect())
    }

    async fn append_event(
        &self,
        session_id: Uuid,
        kind: SessionEventKind,
        data: serde_json::Value,
    ) -> StoreResult<SessionEvent> {
        let event = SessionEvent::new(session_id, kind, data, self.next_sequence());
        let mut inner = self.inner.write().await;
        inner.events.entry(session_id).or_default().push(event.clone());
        Ok(event)
    }

    async fn list_events(&self, session_id: Uuid) -> StoreResult<Vec<SessionEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(&session_id).cloned().unwrap_or_default())
    }

    async fn append_metrics(&self, metrics: SessionMetrics) -> StoreResult<SessionMetrics> {
        let mut inner = self.inner.write().await;
        inner.metrics.entry(metrics.session_id).or_default().push(metrics.clone());
        Ok(metrics)
    }

    async fn create_pool(&self, pool: WorkPool) -> StoreResult<WorkPool> {
        let mut inner = self.inner.write().await;
        inner.pools.insert(pool.id, pool.clone());
        Ok(pool)
    }

    async fn get_pool(&self, id: Uuid) -> StoreResult<WorkPool> {
        let inner = self.inner.read().await;
        inner.pools.get(&id).cloned().ok_or_else(|| StoreError::NotFound(format!("pool {id}")))
    }

    async fn update_pool(&self, pool: WorkPool) -> StoreResult<WorkPool> {
        let mut inner = self.inner.write().await;
        if !inner.pools.contains_key(&pool.id) {
            return Err(StoreError::NotFound(format!("pool {}", pool.id)));
        }
        inner.pools.insert(pool.id, pool.clone());
        Ok(pool)
    }

    async fn delete_pool(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.pools.remove(&id);
        Ok(())
    }

    async fn list_pools(&self) -> StoreResult<Vec<WorkPool>> {
        let inner = self.inner.read().await;
        Ok(inner.pools.values().cloned().collect())
    }

    async fn create_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let mut inner = self.inner.write().await;
        inner.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker> {
        let inner = self.inner.read().await;
        inner.workers.get(&id).cloned().ok_or_else(|| StoreError::NotFound(format!("worker {id}")))
    }

    async fn update_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let mut inner = self.inner.write().await;
        if !inner.workers.contains_key(&worker.id) {
            return Err(StoreError::NotFound(format!("worker {}", worker.id)));
        }
        inner.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.workers.remove(&id);
        Ok(())
    }

    async fn list_workers_for_pool(&self, pool_id: Uuid) -> StoreResult<Vec<Worker>> {
        let inner = self.inner.read().await;
        Ok(inner.workers.values().filter(|w| w.pool_id == pool_id).cloned().collect())
    }

    async fn count_sessions_by_status(&self, pool_id: Uuid) -> StoreResult<HashMap<SessionStatus, u32>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for s in inner.sessions.values().filter(|s| s.work_pool_id == Some(pool_id)) {
            *counts.entry(s.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn atomic_claim(&self, pool_id: Uuid, claimed_by: &str) -> StoreResult<ClaimOutcome> {
        let mut inner = self.inner.write().await;

        let candidate_id = inner
            .sessions
            .values()
            .filter(|s| s.work_pool_id == Some(pool_id) && s.status == SessionStatus::Available)
            .min_by_key(|s| s.available_at.unwrap_or(s.created_at))
            .map(|s| s.id);

        let Some(id) = candidate_id else {
            return Ok(ClaimOutcome::Empty);
        };

        let now = Utc::now();
        let session = {
            let s = inner.sessions.get_mut(&id).expect("candidate id came from this map");
            s.status = SessionStatus::Claimed;
            s.claimed_by = Some(claimed_by.to_string());
            s.claimed_at = Some(now);
            s.available_at = None;
            s.updated_at = now;
            s.clone()
        };

        if let Some(pool) = inner.pools.get_mut(&pool_id) {
            pool.available_size = pool.available_size.saturating_sub(1);
        }

        let sequence = self.next_sequence();
        inner.events.entry(id).or_default().push(SessionEvent::new(
            id,
            SessionEventKind::SessionClaimed,
            serde_json::json!({ "claimed_by": claimed_by }),
            sequence,
        ));

        Ok(ClaimOutcome::Claimed(session))
    }

    async fn release(&self, session_id: Uuid, caller: &str) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        if session.claimed_by.as_deref() != Some(caller) {
            return Err(StoreError::Conflict(format!(
                "session {session_id} is not claimed by {caller}"
            )));
        }

        let now = Utc::now();
        let updated = {
            let s = inner.sessions.get_mut(&session_id).expect("checked above");
            if s.is_pooled {
                s.status = SessionStatus::Available;
                s.claimed_by = None;
                s.claimed_at = None;
                s.available_at = Some(now);
            } else {
                s.status = SessionStatus::Terminated;
            }
            s.updated_at = now;
            s.clone()
        };

        if updated.is_pooled {
            if let Some(pool_id) = updated.work_pool_id {
                if let Some(pool) = inner.pools.get_mut(&pool_id) {
                    pool.available_size += 1;
                }
            }
        }

        Ok(updated)
    }

    async fn mark_worker_sessions_failed(&self, worker_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0u64;
        for s in inner.sessions.values_mut() {
            if s.worker_id == Some(worker_id) && !s.status.is_terminal() {
                s.status = SessionStatus::Failed;
                s.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_expired(&self, max_age: chrono::Duration) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - max_age;
        let expired: Vec<Uuid> = inner
            .sessions
            .values()
            .filter(|s| s.status.is_terminal() && s.updated_at < cutoff)
            .map(|s| s.id)
            .collect();
        for id in &expired {
            inner.sessions.remove(id);
            inner.events.remove(id);
            inner.metrics.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn cleanup_expired_available(&self, pool_id: Uuid, max_idle: chrono::Duration) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - max_idle;
        let mut count = 0u64;
        for s in inner.sessions.values_mut() {
            if s.work_pool_id == Some(pool_id)
                && s.status == SessionStatus::Available
                && s.available_at.is_some_and(|t| t < cutoff)
            {
                s.status = SessionStatus::Expired;
                s.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl PoolLookupPort for MemoryStore {
    async fn default_pool_for(&self, provider: ProviderKind) -> StoreResult<WorkPool> {
        {
            let inner = self.inner.read().await;
            if let Some(pool) = inner.pools.values().find(|p| p.provider == provider && p.name == "default") {
                return Ok(pool.clone());
            }
        }
        let mut pool = WorkPool::new("default", provider, 0, 10)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        pool.auto_scale = false;
        self.create_pool(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browsergrid_core::domain::entities::ProviderKind;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStore::new();
        let session = Session::new("local", false);
        let id = session.id;
        store.create_session(session).await.unwrap();
        let fetched = store.get_session(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_session(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn atomic_claim_picks_oldest_available_and_updates_pool_size() {
        let store = MemoryStore::new();
        let mut pool = WorkPool::new("p", ProviderKind::Local, 0, 10).unwrap();
        pool.available_size = 2;
        let pool_id = pool.id;
        store.create_pool(pool).await.unwrap();

        let mut older = Session::new("local", true);
        older.work_pool_id = Some(pool_id);
        older.status = SessionStatus::Available;
        older.available_at = Some(Utc::now() - chrono::Duration::seconds(30));
        store.create_session(older.clone()).await.unwrap();

        let mut newer = Session::new("local", true);
        newer.work_pool_id = Some(pool_id);
        newer.status = SessionStatus::Available;
        newer.available_at = Some(Utc::now());
        store.create_session(newer).await.unwrap();

        let claimed = match store.atomic_claim(pool_id, "worker-1").await.unwrap() {
            ClaimOutcome::Claimed(s) => s,
            ClaimOutcome::Empty => panic!("expected a claim"),
        };
        assert_eq!(claimed.id, older.id);
        assert_eq!(claimed.status, SessionStatus::Claimed);

        let pool_after = store.get_pool(pool_id).await.unwrap();
        assert_eq!(pool_after.available_size, 1);
    }

    #[tokio::test]
    async fn atomic_claim_empty_pool_returns_empty() {
        let store = MemoryStore::new();
        let result = store.atomic_claim(Uuid::new_v4(), "worker-1").await.unwrap();
        assert_eq!(result, ClaimOutcome::Empty);
    }

    #[tokio::test]
    async fn release_wrong_caller_is_conflict() {
        let store = MemoryStore::new();
        let mut pool = WorkPool::new("p", ProviderKind::Local, 0, 10).unwrap();
        let pool_id = pool.id;
        pool.available_size = 1;
        store.create_pool(pool).await.unwrap();

        let mut session = Session::new("local", true);
        session.work_pool_id = Some(pool_id);
        session.status = SessionStatus::Available;
        store.create_session(session).await.unwrap();

        let claimed = match store.atomic_claim(pool_id, "worker-1").await.unwrap() {
            ClaimOutcome::Claimed(s) => s,
            ClaimOutcome::Empty => panic!("expected a claim"),
        };

        let err = store.release(claimed.id, "worker-2").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_sessions_orders_by_created_at_descending() {
        let store = MemoryStore::new();
        let mut older = Session::new("local", false);
        older.created_at = Utc::now() - chrono::Duration::seconds(30);
        let older_id = older.id;
        store.create_session(older).await.unwrap();

        let mut newer = Session::new("local", false);
        newer.created_at = Utc::now();
        let newer_id = newer.id;
        store.create_session(newer).await.unwrap();

        let listed = store
            .list_sessions(SessionFilter::default(), Pagination { offset: 0, limit: 100 })
            .await
            .unwrap();
        assert_eq!(listed[0].id, newer_id);
        assert_eq!(listed[1].id, older_id);
    }

    #[tokio::test]
    async fn default_pool_for_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.default_pool_for(ProviderKind::Container).await.unwrap();
        let b = store.default_pool_for(ProviderKind::Container).await.unwrap();
        assert_eq!(a.id, b.id);
    }
}
