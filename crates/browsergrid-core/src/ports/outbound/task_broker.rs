//! Task Broker port (spec.md §4.2): a durable FIFO broker with named
//! queues, at-least-once delivery, per-task retry, and visibility
//! timeouts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the Task Broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("duplicate unique_key: {0}")]
    DuplicateUniqueKey(String),

    #[error("transient broker error: {0}")]
    Transient(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// The kind of work a task carries, tagging its opaque payload
/// (spec.md §9 "Dynamic payloads"). Each scheduler handler decodes the
/// payload into its own typed struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PoolScale,
    SessionStart,
    SessionStop,
    SessionHealthCheck,
    CleanupExpired,
}

/// Options controlling enqueue behavior.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_retry: Option<u32>,
    pub deadline: Option<Duration>,
    /// Guarantees no two tasks with the same key coexist in
    /// pending/scheduled state.
    pub unique_key: Option<String>,
}

/// A dequeued unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_retry: u32,
}

/// What a handler tells the broker to do with a task it just processed.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Ok,
    Retry(Duration),
    Fail,
}

/// Observability snapshot for a queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub scheduled: u64,
    pub retrying: u64,
}

/// Outbound port for the durable task broker.
#[async_trait]
pub trait TaskBrokerPort: Send + Sync {
    /// Enqueues a task, returning its id. If `options.unique_key` is set
    /// and a task with the same key is already pending/scheduled, returns
    /// the existing task's id without creating a duplicate.
    async fn enqueue(
        &self,
        queue: &str,
        kind: TaskKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> BrokerResult<Uuid>;

    /// Pops up to `max` ready tasks from `queue` for processing. Popped
    /// tasks become invisible to other dequeuers until `ack`/`nack`/a
    /// visibility timeout elapses.
    async fn dequeue(&self, queue: &str, max: usize) -> BrokerResult<Vec<Task>>;

    /// Acknowledges successful processing, removing the task.
    async fn ack(&self, task_id: Uuid) -> BrokerResult<()>;

    /// Schedules `task_id` for redelivery after `after`, incrementing its
    /// attempt counter. Once `attempt > max_retry` the broker should
    /// treat the next `nack` as a permanent failure instead.
    async fn nack(&self, task_id: Uuid, after: Duration) -> BrokerResult<()>;

    /// Marks a task permanently failed (attempts exhausted or the
    /// handler reported `HandlerOutcome::Fail`).
    async fn fail(&self, task_id: Uuid) -> BrokerResult<()>;

    /// Observability snapshot for a queue.
    async fn inspect(&self, queue: &str) -> BrokerResult<QueueStats>;
}
