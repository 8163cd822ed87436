//! Redis-backed `TaskBrokerPort` adapter: a `LIST` per queue for ready
//! tasks, a `ZSET` per queue for delayed/retrying tasks scored by
//! ready-at unix millis, and a `HASH` per task for its payload.
//! `unique_key` dedup is a `SETNX` pointer from the key to the task id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use browsergrid_core::ports::outbound::{
    BrokerError, BrokerResult, EnqueueOptions, QueueStats, Task, TaskBrokerPort, TaskKind,
};

fn pending_key(queue: &str) -> String {
    format!("bg:queue:{queue}:pending")
}
fn scheduled_key(queue: &str) -> String {
    format!("bg:queue:{queue}:scheduled")
}
fn task_key(id: Uuid) -> String {
    format!("bg:task:{id}")
}
fn unique_key(queue: &str, key: &str) -> String {
    format!("bg:unique:{queue}:{key}")
}

fn transient(err: redis::RedisError) -> BrokerError {
    BrokerError::Transient(err.to_string())
}

fn encode_kind(kind: TaskKind) -> BrokerResult<String> {
    match serde_json::to_value(kind) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        _ => Err(BrokerError::Transient("failed to encode task kind".into())),
    }
}

fn decode_kind(raw: &str) -> BrokerResult<TaskKind> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| BrokerError::Transient(format!("bad task kind '{raw}': {e}")))
}

pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(addr: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(addr)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn store_task(
        &self,
        conn: &mut ConnectionManager,
        id: Uuid,
        queue: &str,
        kind: TaskKind,
        payload: &serde_json::Value,
        max_retry: u32,
        unique: Option<&str>,
    ) -> BrokerResult<()> {
        let kind_str = encode_kind(kind)?;
        let payload_str = serde_json::to_string(payload).map_err(|e| BrokerError::Transient(e.to_string()))?;
        let mut pairs: Vec<(&str, String)> = vec![
            ("queue", queue.to_string()),
            ("kind", kind_str),
            ("payload", payload_str),
            ("attempt", "0".to_string()),
            ("max_retry", max_retry.to_string()),
        ];
        if let Some(u) = unique {
            pairs.push(("unique_key", u.to_string()));
        }
        conn.hset_multiple::<_, _, _, ()>(task_key(id), &pairs).await.map_err(transient)
    }

    async fn promote_scheduled(&self, conn: &mut ConnectionManager, queue: &str) -> BrokerResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let ready: Vec<String> = conn
            .zrangebyscore(scheduled_key(queue), 0, now_ms)
            .await
            .map_err(transient)?;
        for id_str in ready {
            let removed: i64 = conn
                .zrem(scheduled_key(queue), &id_str)
                .await
                .map_err(transient)?;
            if removed > 0 {
                let _: () = conn.rpush(pending_key(queue), &id_str).await.map_err(transient)?;
            }
        }
        Ok(())
    }

    async fn load_task(&self, conn: &mut ConnectionManager, id: Uuid, queue: &str) -> BrokerResult<Option<Task>> {
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(task_key(id)).await.map_err(transient)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let kind = decode_kind(fields.get("kind").map(String::as_str).unwrap_or(""))?;
        let payload: serde_json::Value = fields
            .get("payload")
            .map(|p| serde_json::from_str(p))
            .transpose()
            .map_err(|e| BrokerError::Transient(e.to_string()))?
            .unwrap_or(serde_json::Value::Null);
        let attempt: u32 = fields.get("attempt").and_then(|a| a.parse().ok()).unwrap_or(0);
        let max_retry: u32 = fields.get("max_retry").and_then(|m| m.parse().ok()).unwrap_or(5);

        Ok(Some(Task {
            id,
            queue: queue.to_string(),
            kind,
            payload,
            attempt,
            max_retry,
        }))
    }
}

#[async_trait]
impl TaskBrokerPort for RedisBroker {
    async fn enqueue(
        &self,
        queue: &str,
        kind: TaskKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> BrokerResult<Uuid> {
        let mut conn = self.conn.clone();

        if let Some(key) = &options.unique_key {
            let uk = unique_key(queue, key);
            let id = Uuid::new_v4();
            let set: bool = conn.set_nx(&uk, id.to_string()).await.map_err(transient)?;
            if !set {
                let existing: String = conn.get(&uk).await.map_err(transient)?;
                return Uuid::parse_str(&existing).map_err(|e| BrokerError::Transient(e.to_string()));
            }
            self.store_task(&mut conn, id, queue, kind, &payload, options.max_retry.unwrap_or(5), Some(key))
                .await?;
            match options.deadline {
                Some(delay) => {
                    let ready_at = (Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()).timestamp_millis();
                    let _: () = conn.zadd(scheduled_key(queue), id.to_string(), ready_at).await.map_err(transient)?;
                }
                None => {
                    let _: () = conn.rpush(pending_key(queue), id.to_string()).await.map_err(transient)?;
                }
            }
            return Ok(id);
        }

        let id = Uuid::new_v4();
        self.store_task(&mut conn, id, queue, kind, &payload, options.max_retry.unwrap_or(5), None)
            .await?;
        match options.deadline {
            Some(delay) => {
                let ready_at = (Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()).timestamp_millis();
                let _: () = conn.zadd(scheduled_key(queue), id.to_string(), ready_at).await.map_err(transient)?;
            }
            None => {
                let _: () = conn.rpush(pending_key(queue), id.to_string()).await.map_err(transient)?;
            }
        }
        Ok(id)
    }

    async fn dequeue(&self, queue: &str, max: usize) -> BrokerResult<Vec<Task>> {
        let mut conn = self.conn.clone();
        self.promote_scheduled(&mut conn, queue).await?;

        let mut tasks = Vec::with_capacity(max);
        for _ in 0..max {
            let id_str: Option<String> = conn.lpop(pending_key(queue), None).await.map_err(transient)?;
            let Some(id_str) = id_str else { break };
            let Ok(id) = Uuid::parse_str(&id_str) else { continue };
            if let Some(task) = self.load_task(&mut conn, id, queue).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn ack(&self, task_id: Uuid) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(task_key(task_id)).await.map_err(transient)?;
        if let (Some(queue), Some(key)) = (fields.get("queue"), fields.get("unique_key")) {
            let _: () = conn.del(unique_key(queue, key)).await.map_err(transient)?;
        }
        let _: () = conn.del(task_key(task_id)).await.map_err(transient)?;
        Ok(())
    }

    async fn nack(&self, task_id: Uuid, after: Duration) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(task_key(task_id)).await.map_err(transient)?;
        if fields.is_empty() {
            return Err(BrokerError::Transient(format!("unknown task {task_id}")));
        }
        let queue = fields.get("queue").cloned().unwrap_or_default();
        let attempt: u32 = fields.get("attempt").and_then(|a| a.parse().ok()).unwrap_or(0);
        let max_retry: u32 = fields.get("max_retry").and_then(|m| m.parse().ok()).unwrap_or(5);
        let next_attempt = attempt + 1;

        if next_attempt > max_retry {
            return self.fail(task_id).await;
        }

        let _: () = conn.hset(task_key(task_id), "attempt", next_attempt).await.map_err(transient)?;
        let ready_at = (Utc::now() + chrono::Duration::from_std(after).unwrap_or_default()).timestamp_millis();
        let _: () = conn.zadd(scheduled_key(&queue), task_id.to_string(), ready_at).await.map_err(transient)?;
        Ok(())
    }

    async fn fail(&self, task_id: Uuid) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(task_key(task_id)).await.map_err(transient)?;
        if let Some(queue) = fields.get("queue") {
            let _: () = conn.zrem(scheduled_key(queue), task_id.to_string()).await.map_err(transient)?;
            if let Some(key) = fields.get("unique_key") {
                let _: () = conn.del(unique_key(queue, key)).await.map_err(transient)?;
            }
        }
        let _: () = conn.del(task_key(task_id)).await.map_err(transient)?;
        Ok(())
    }

    async fn inspect(&self, queue: &str) -> BrokerResult<QueueStats> {
        let mut conn = self.conn.clone();
        let pending: u64 = conn.llen(pending_key(queue)).await.map_err(transient)?;
        let scheduled_ids: Vec<String> = conn.zrange(scheduled_key(queue), 0, -1).await.map_err(transient)?;
        let scheduled = scheduled_ids.len() as u64;

        let mut retrying = 0u64;
        for id_str in &scheduled_ids {
            let attempt: Option<String> = conn.hget(format!("bg:task:{id_str}"), "attempt").await.map_err(transient)?;
            if attempt.and_then(|a| a.parse::<u32>().ok()).unwrap_or(0) > 0 {
                retrying += 1;
            }
        }

        Ok(QueueStats { pending, scheduled, retrying })
    }
}
