//! In-memory `TaskBrokerPort` adapter.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use browsergrid_core::ports::outbound::{
    BrokerError, BrokerResult, EnqueueOptions, QueueStats, Task, TaskBrokerPort, TaskKind,
};

#[derive(Clone)]
struct TaskRecord {
    queue: String,
    kind: TaskKind,
    payload: serde_json::Value,
    attempt: u32,
    max_retry: u32,
    unique_key: Option<String>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Uuid>,
    /// Tasks not yet visible, keyed by the instant they become ready.
    scheduled: Vec<(DateTime<Utc>, Uuid)>,
    in_flight: std::collections::HashSet<Uuid>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, TaskRecord>,
    queues: HashMap<String, Queue>,
    unique_keys: HashMap<(String, String), Uuid>,
}

/// A process-local broker. FIFO order within a queue is preserved by a
/// `VecDeque`; retry/delay visibility is modeled with a sorted
/// `(ready_at, id)` list scanned on every `dequeue`, which is fine at the
/// scale a single test process or local dev loop ever reaches.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskBrokerPort for MemoryBroker {
    async fn enqueue(
        &self,
        queue: &str,
        kind: TaskKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> BrokerResult<Uuid> {
        let mut state = self.state.lock().await;

        if let Some(key) = &options.unique_key {
            if let Some(existing) = state.unique_keys.get(&(queue.to_string(), key.clone())) {
                return Ok(*existing);
            }
        }

        let id = Uuid::new_v4();
        state.tasks.insert(
            id,
            TaskRecord {
                queue: queue.to_string(),
                kind,
                payload,
                attempt: 0,
                max_retry: options.max_retry.unwrap_or(5),
                unique_key: options.unique_key.clone(),
            },
        );
        if let Some(key) = options.unique_key {
            state.unique_keys.insert((queue.to_string(), key), id);
        }

        let q = state.queues.entry(queue.to_string()).or_default();
        match options.deadline {
            Some(delay) => {
                let ready_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                q.scheduled.push((ready_at, id));
            }
            None => q.pending.push_back(id),
        }

        Ok(id)
    }

    async fn dequeue(&self, queue: &str, max: usize) -> BrokerResult<Vec<Task>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        {
            let q = state.queues.entry(queue.to_string()).or_default();
            q.scheduled.sort_by_key(|(ready_at, _)| *ready_at);
            let ready_count = q.scheduled.iter().take_while(|(ready_at, _)| *ready_at <= now).count();
            for (_, id) in q.scheduled.drain(0..ready_count) {
                q.pending.push_back(id);
            }
        }

        let mut tasks = Vec::with_capacity(max);
        let q = state.queues.entry(queue.to_string()).or_default();
        for _ in 0..max {
            let Some(id) = q.pending.pop_front() else { break };
            q.in_flight.insert(id);
            if let Some(record) = state.tasks.get(&id) {
                tasks.push(Task {
                    id,
                    queue: record.queue.clone(),
                    kind: record.kind,
                    payload: record.payload.clone(),
                    attempt: record.attempt,
                    max_retry: record.max_retry,
                });
            }
        }
        Ok(tasks)
    }

    async fn ack(&self, task_id: Uuid) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.tasks.remove(&task_id) {
            if let Some(q) = state.queues.get_mut(&record.queue) {
                q.in_flight.remove(&task_id);
            }
            if let Some(key) = record.unique_key {
                state.unique_keys.remove(&(record.queue, key));
            }
        }
        Ok(())
    }

    async fn nack(&self, task_id: Uuid, after: Duration) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.get(&task_id).cloned() else {
            return Err(BrokerError::Transient(format!("unknown task {task_id}")));
        };
        let attempt = record.attempt + 1;
        if attempt > record.max_retry {
            drop(record);
            return self.fail(task_id).await;
        }

        if let Some(t) = state.tasks.get_mut(&task_id) {
            t.attempt = attempt;
        }
        if let Some(q) = state.queues.get_mut(&record.queue) {
            q.in_flight.remove(&task_id);
            let ready_at =
                Utc::now() + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
            q.scheduled.push((ready_at, task_id));
        }
        Ok(())
    }

    async fn fail(&self, task_id: Uuid) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.tasks.remove(&task_id) {
            if let Some(q) = state.queues.get_mut(&record.queue) {
                q.in_flight.remove(&task_id);
                q.scheduled.retain(|(_, id)| *id != task_id);
            }
            if let Some(key) = record.unique_key {
                state.unique_keys.remove(&(record.queue, key));
            }
        }
        Ok(())
    }

    async fn inspect(&self, queue: &str) -> BrokerResult<QueueStats> {
        let state = self.state.lock().await;
        let Some(q) = state.queues.get(queue) else {
            return Ok(QueueStats::default());
        };
        let retrying = q
            .scheduled
            .iter()
            .filter(|(_, id)| state.tasks.get(id).is_some_and(|t| t.attempt > 0))
            .count() as u64;
        Ok(QueueStats {
            pending: q.pending.len() as u64,
            scheduled: q.scheduled.len() as u64,
            retrying,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let broker = MemoryBroker::new();
        let id = broker
            .enqueue("default", TaskKind::SessionStart, serde_json::json!({"a": 1}), EnqueueOptions::default())
            .await
            .unwrap();

        let tasks = broker.dequeue("default", 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].attempt, 0);
    }

    #[tokio::test]
    async fn unique_key_dedupes_pending_tasks() {
        let broker = MemoryBroker::new();
        let opts = EnqueueOptions { unique_key: Some("pool-1-scale".into()), ..Default::default() };
        let a = broker.enqueue("default", TaskKind::PoolScale, serde_json::json!({}), opts.clone()).await.unwrap();
        let b = broker.enqueue("default", TaskKind::PoolScale, serde_json::json!({}), opts).await.unwrap();
        assert_eq!(a, b);

        let tasks = broker.dequeue("default", 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn nack_reschedules_until_retries_exhausted() {
        let broker = MemoryBroker::new();
        let opts = EnqueueOptions { max_retry: Some(1), ..Default::default() };
        let id = broker.enqueue("q", TaskKind::SessionHealthCheck, serde_json::json!({}), opts).await.unwrap();
        broker.dequeue("q", 1).await.unwrap();

        broker.nack(id, StdDuration::from_millis(0)).await.unwrap();
        let stats = broker.inspect("q").await.unwrap();
        assert_eq!(stats.scheduled, 1);

        let redelivered = broker.dequeue("q", 1).await.unwrap();
        assert_eq!(redelivered[0].attempt, 1);

        broker.nack(id, StdDuration::from_millis(0)).await.unwrap();
        let stats_after_exhaustion = broker.inspect("q").await.unwrap();
        assert_eq!(stats_after_exhaustion.scheduled, 0);
        assert_eq!(stats_after_exhaustion.pending, 0);
    }

    #[tokio::test]
    async fn ack_removes_task_and_frees_unique_key() {
        let broker = MemoryBroker::new();
        let opts = EnqueueOptions { unique_key: Some("k".into()), ..Default::default() };
        let id = broker.enqueue("q", TaskKind::CleanupExpired, serde_json::json!({}), opts.clone()).await.unwrap();
        broker.dequeue("q", 1).await.unwrap();
        broker.ack(id).await.unwrap();

        let again = broker.enqueue("q", TaskKind::CleanupExpired, serde_json::json!({}), opts).await.unwrap();
        assert_ne!(id, again);
    }
}
