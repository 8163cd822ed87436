//! Generic worker loop (spec.md §5): dequeues from one queue, dispatches
//! by `TaskKind` to a registered handler, and turns its `HandlerOutcome`
//! into the matching broker call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use browsergrid_core::ports::outbound::{HandlerOutcome, Task, TaskBrokerPort, TaskKind};
use tokio_util::sync::CancellationToken;

use crate::handlers::TaskHandler;

const DEQUEUE_BATCH: usize = 10;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Worker {
    queue: String,
    broker: Arc<dyn TaskBrokerPort>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl Worker {
    #[must_use]
    pub fn new(queue: impl Into<String>, broker: Arc<dyn TaskBrokerPort>, handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>) -> Self {
        Self { queue: queue.into(), broker, handlers }
    }

    /// Runs until `cancel` fires, then drains any tasks already dequeued
    /// before returning (spec.md §5 "workers drain in-flight work within
    /// a grace period on shutdown").
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let tasks = match self.broker.dequeue(&self.queue, DEQUEUE_BATCH).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "worker: dequeue failed");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    }
                    continue;
                }
            };

            if tasks.is_empty() {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
                continue;
            }

            let processed = tasks.into_iter().map(|task| self.process(task));
            futures::future::join_all(processed).await;
        }
    }

    async fn process(&self, task: Task) {
        let Some(handler) = self.handlers.get(&task.kind).cloned() else {
            tracing::error!(task_id = %task.id, kind = ?task.kind, "worker: no handler registered for task kind");
            if let Err(e) = self.broker.fail(task.id).await {
                tracing::error!(task_id = %task.id, error = %e, "worker: failed to mark unroutable task as failed");
            }
            return;
        };

        let outcome = handler.handle(&task).await;
        let result = match outcome {
            HandlerOutcome::Ok => self.broker.ack(task.id).await,
            HandlerOutcome::Retry(after) => self.broker.nack(task.id, after).await,
            HandlerOutcome::Fail => self.broker.fail(task.id).await,
        };
        if let Err(e) = result {
            tracing::error!(task_id = %task.id, error = %e, "worker: failed to report task outcome to broker");
        }
    }
}
