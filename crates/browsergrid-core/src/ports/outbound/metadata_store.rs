//! Metadata Store port (spec.md §4.1): transactional CRUD over sessions,
//! work pools, and workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{Session, SessionEvent, SessionMetrics, WorkPool, Worker};
use crate::domain::state_machine::{SessionEventKind, SessionStatus};

/// Errors surfaced by the Metadata Store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("transient storage error: {0}")]
    Transient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters for `list_sessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Offset/limit pagination, `limit` clamped to `[0, 100]` by the caller
/// (the HTTP layer) before reaching the store.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 20 }
    }
}

/// Outcome of an atomic claim attempt (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Session),
    Empty,
}

/// Outbound port for persistence operations over the control-plane
/// entities. Implementations must make `atomic_claim` and `release`
/// single-transaction, row-locking operations (spec.md §4.1).
#[async_trait]
pub trait MetadataStorePort: Send + Sync {
    // -- Session CRUD --
    async fn create_session(&self, session: Session) -> StoreResult<Session>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Session>;
    async fn update_session(&self, session: Session) -> StoreResult<Session>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<()>;
    async fn list_sessions(
        &self,
        filter: SessionFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<Session>>;

    // -- Session events / metrics (append-only) --
    async fn append_event(
        &self,
        session_id: Uuid,
        kind: SessionEventKind,
        data: serde_json::Value,
    ) -> StoreResult<SessionEvent>;
    async fn list_events(&self, session_id: Uuid) -> StoreResult<Vec<SessionEvent>>;
    async fn append_metrics(&self, metrics: SessionMetrics) -> StoreResult<SessionMetrics>;

    // -- Work pool CRUD --
    async fn create_pool(&self, pool: WorkPool) -> StoreResult<WorkPool>;
    async fn get_pool(&self, id: Uuid) -> StoreResult<WorkPool>;
    async fn update_pool(&self, pool: WorkPool) -> StoreResult<WorkPool>;
    async fn delete_pool(&self, id: Uuid) -> StoreResult<()>;
    async fn list_pools(&self) -> StoreResult<Vec<WorkPool>>;

    // -- Worker CRUD --
    async fn create_worker(&self, worker: Worker) -> StoreResult<Worker>;
    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker>;
    async fn update_worker(&self, worker: Worker) -> StoreResult<Worker>;
    async fn delete_worker(&self, id: Uuid) -> StoreResult<()>;
    async fn list_workers_for_pool(&self, pool_id: Uuid) -> StoreResult<Vec<Worker>>;

    /// Counts sessions by status for a pool (used by the Reconciler's
    /// tick, spec.md §4.6 step 1-2).
    async fn count_sessions_by_status(
        &self,
        pool_id: Uuid,
    ) -> StoreResult<std::collections::HashMap<SessionStatus, u32>>;

    /// Selects and claims one available, unclaimed session for `pool_id`
    /// ordered by `available_at ASC`, row-locked, atomically decrementing
    /// the pool's `available_size` and appending a `session_claimed`
    /// event — all in one transaction (spec.md §4.4 step 1-4).
    async fn atomic_claim(&self, pool_id: Uuid, claimed_by: &str) -> StoreResult<ClaimOutcome>;

    /// Releases a session. For pooled sessions this resets claim fields
    /// and increments `available_size`, but only if `caller` matches
    /// `claimed_by` (spec.md §9c: release-authorization always enforced).
    /// For non-pooled sessions this transitions to `terminated`.
    async fn release(&self, session_id: Uuid, caller: &str) -> StoreResult<Session>;

    /// Bulk-transitions every non-terminal session owned by `worker_id`
    /// to `failed` (spec.md §4.1, used when a worker goes offline).
    async fn mark_worker_sessions_failed(&self, worker_id: Uuid) -> StoreResult<u64>;

    /// Deletes terminal-status sessions older than `max_age`, cascading
    /// to events and metrics.
    async fn cleanup_expired(&self, max_age: chrono::Duration) -> StoreResult<u64>;

    /// Transitions `available` sessions in `pool_id` whose `available_at`
    /// predates `now - max_idle` to `expired` (spec.md §4.4 "Cleanup").
    async fn cleanup_expired_available(
        &self,
        pool_id: Uuid,
        max_idle: chrono::Duration,
    ) -> StoreResult<u64>;
}
