//! Postgres `MetadataStorePort` adapter. `atomic_claim` and `release`
//! are the one place correctness actually depends on the database: both
//! run inside a single transaction and use `SELECT ... FOR UPDATE` to
//! serialize concurrent claimants against the same pool (spec.md §4.4).

mod codec;
mod migrations;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use browsergrid_core::domain::entities::{
    BrowserKind, ProviderKind, ProxyConfig, QueueStrategy, ResourceLimits, ScreenConfig, Session, SessionEvent,
    SessionMetrics, WorkPool, Worker,
};
use browsergrid_core::domain::state_machine::{SessionEventKind, SessionStatus};
use browsergrid_core::ports::outbound::{
    ClaimOutcome, MetadataStorePort, Pagination, PoolLookupPort, SessionFilter, StoreError, StoreResult,
};

use codec::{decode_enum, encode_enum};

/// Terminal statuses as their wire strings, used by queries that need to
/// exclude or target every terminal status without re-deriving the list
/// from `SessionStatus::is_terminal` at the SQL layer.
const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "expired", "crashed", "timed_out", "terminated"];

fn transient(err: sqlx::Error) -> StoreError {
    StoreError::Transient(err.to_string())
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and runs schema bootstrap. `max_connections` mirrors the
    /// teacher's CLI-configurable pool size.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Session> {
    let browser: BrowserKind = decode_enum(row.try_get::<String, _>("browser").map_err(transient)?.as_str())?;
    let status: SessionStatus = decode_enum(row.try_get::<String, _>("status").map_err(transient)?.as_str())?;
    let screen: ScreenConfig = serde_json::from_value(row.try_get("screen").map_err(transient)?)
        .map_err(|e| StoreError::Transient(format!("bad screen json: {e}")))?;
    let proxy: Option<ProxyConfig> = match row.try_get::<Option<serde_json::Value>, _>("proxy").map_err(transient)? {
        Some(v) => Some(serde_json::from_value(v).map_err(|e| StoreError::Transient(format!("bad proxy json: {e}")))?),
        None => None,
    };
    let resources: ResourceLimits = serde_json::from_value(row.try_get("resources").map_err(transient)?)
        .map_err(|e| StoreError::Transient(format!("bad resources json: {e}")))?;
    let environment: HashMap<String, String> = serde_json::from_value(row.try_get("environment").map_err(transient)?)
        .map_err(|e| StoreError::Transient(format!("bad environment json: {e}")))?;

    Ok(Session {
        id: row.try_get("id").map_err(transient)?,
        browser,
        browser_version: row.try_get("browser_version").map_err(transient)?,
        os: row.try_get("os").map_err(transient)?,
        headless: row.try_get("headless").map_err(transient)?,
        screen,
        proxy,
        resources,
        environment,
        status,
        provider: row.try_get("provider").map_err(transient)?,
        work_pool_id: row.try_get("work_pool_id").map_err(transient)?,
        worker_id: row.try_get("worker_id").map_err(transient)?,
        ws_endpoint: row.try_get("ws_endpoint").map_err(transient)?,
        live_url: row.try_get("live_url").map_err(transient)?,
        is_pooled: row.try_get("is_pooled").map_err(transient)?,
        claimed_by: row.try_get("claimed_by").map_err(transient)?,
        claimed_at: row.try_get("claimed_at").map_err(transient)?,
        available_at: row.try_get("available_at").map_err(transient)?,
        created_at: row.try_get("created_at").map_err(transient)?,
        updated_at: row.try_get("updated_at").map_err(transient)?,
        expires_at: row.try_get("expires_at").map_err(transient)?,
    })
}

fn pool_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<WorkPool> {
    let provider: ProviderKind = decode_enum(row.try_get::<String, _>("provider").map_err(transient)?.as_str())?;
    let queue_strategy: QueueStrategy =
        decode_enum(row.try_get::<String, _>("queue_strategy").map_err(transient)?.as_str())?;
    let default_env: HashMap<String, String> = serde_json::from_value(row.try_get("default_env").map_err(transient)?)
        .map_err(|e| StoreError::Transient(format!("bad default_env json: {e}")))?;

    Ok(WorkPool {
        id: row.try_get("id").map_err(transient)?,
        name: row.try_get("name").map_err(transient)?,
        provider,
        min_size: row.try_get::<i32, _>("min_size").map_err(transient)? as u32,
        max_concurrency: row.try_get::<i32, _>("max_concurrency").map_err(transient)? as u32,
        paused: row.try_get("paused").map_err(transient)?,
        auto_scale: row.try_get("auto_scale").map_err(transient)?,
        default_image: row.try_get("default_image").map_err(transient)?,
        default_env,
        max_idle_seconds: row.try_get::<i32, _>("max_idle_seconds").map_err(transient)? as u32,
        max_session_duration_seconds: row.try_get::<i32, _>("max_session_duration_seconds").map_err(transient)? as u32,
        queue_strategy,
        available_size: row.try_get::<i32, _>("available_size").map_err(transient)? as u32,
        created_at: row.try_get("created_at").map_err(transient)?,
        updated_at: row.try_get("updated_at").map_err(transient)?,
    })
}

fn worker_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Worker> {
    Ok(Worker {
        id: row.try_get("id").map_err(transient)?,
        pool_id: row.try_get("pool_id").map_err(transient)?,
        hostname: row.try_get("hostname").map_err(transient)?,
        max_slots: row.try_get::<i32, _>("max_slots").map_err(transient)? as u32,
        active_sessions: row.try_get::<i32, _>("active_sessions").map_err(transient)? as u32,
        paused: row.try_get("paused").map_err(transient)?,
        last_beat: row.try_get("last_beat").map_err(transient)?,
    })
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<SessionEvent> {
    let kind: SessionEventKind = decode_enum(row.try_get::<String, _>("kind").map_err(transient)?.as_str())?;
    Ok(SessionEvent {
        id: row.try_get("id").map_err(transient)?,
        session_id: row.try_get("session_id").map_err(transient)?,
        kind,
        data: row.try_get("data").map_err(transient)?,
        timestamp: row.try_get("timestamp").map_err(transient)?,
        sequence: row.try_get::<i64, _>("sequence").map_err(transient)? as u64,
    })
}

fn metrics_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<SessionMetrics> {
    Ok(SessionMetrics {
        id: row.try_get("id").map_err(transient)?,
        session_id: row.try_get("session_id").map_err(transient)?,
        cpu_percent: row.try_get("cpu_percent").map_err(transient)?,
        memory_mb: row.try_get("memory_mb").map_err(transient)?,
        rx_bytes: row.try_get::<i64, _>("rx_bytes").map_err(transient)? as u64,
        tx_bytes: row.try_get::<i64, _>("tx_bytes").map_err(transient)? as u64,
        timestamp: row.try_get("timestamp").map_err(transient)?,
    })
}

#[async_trait]
impl MetadataStorePort for PostgresStore {
    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let browser = encode_enum(&session.browser)?;
        let status = encode_enum(&session.status)?;
        let screen = serde_json::to_value(session.screen).map_err(|e| StoreError::Validation(e.to_string()))?;
        let proxy = session.proxy.as_ref().map(serde_json::to_value).transpose().map_err(|e| StoreError::Validation(e.to_string()))?;
        let resources = serde_json::to_value(session.resources).map_err(|e| StoreError::Validation(e.to_string()))?;
        let environment = serde_json::to_value(&session.environment).map_err(|e| StoreError::Validation(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, browser, browser_version, os, headless, screen, proxy, resources, environment,
                status, provider, work_pool_id, worker_id, ws_endpoint, live_url, is_pooled,
                claimed_by, claimed_at, available_at, created_at, updated_at, expires_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)
            "#,
        )
        .bind(session.id)
        .bind(&browser)
        .bind(&session.browser_version)
        .bind(&session.os)
        .bind(session.headless)
        .bind(&screen)
        .bind(&proxy)
        .bind(&resources)
        .bind(&environment)
        .bind(&status)
        .bind(&session.provider)
        .bind(session.work_pool_id)
        .bind(session.worker_id)
        .bind(&session.ws_endpoint)
        .bind(&session.live_url)
        .bind(session.is_pooled)
        .bind(&session.claimed_by)
        .bind(session.claimed_at)
        .bind(session.available_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(transient)?;

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(transient)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session_from_row(&row)
    }

    async fn update_session(&self, session: Session) -> StoreResult<Session> {
        let status = encode_enum(&session.status)?;
        let screen = serde_json::to_value(session.screen).map_err(|e| StoreError::Validation(e.to_string()))?;
        let proxy = session.proxy.as_ref().map(serde_json::to_value).transpose().map_err(|e| StoreError::Validation(e.to_string()))?;
        let resources = serde_json::to_value(session.resources).map_err(|e| StoreError::Validation(e.to_string()))?;
        let environment = serde_json::to_value(&session.environment).map_err(|e| StoreError::Validation(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                browser_version = $1, headless = $2, screen = $3, proxy = $4, resources = $5,
                environment = $6, status = $7, work_pool_id = $8, worker_id = $9, ws_endpoint = $10,
                live_url = $11, claimed_by = $12, claimed_at = $13, available_at = $14,
                updated_at = $15, expires_at = $16
            WHERE id = $17
            "#,
        )
        .bind(&session.browser_version)
        .bind(session.headless)
        .bind(&screen)
        .bind(&proxy)
        .bind(&resources)
        .bind(&environment)
        .bind(&status)
        .bind(session.work_pool_id)
        .bind(session.worker_id)
        .bind(&session.ws_endpoint)
        .bind(&session.live_url)
        .bind(&session.claimed_by)
        .bind(session.claimed_at)
        .bind(session.available_at)
        .bind(session.updated_at)
        .bind(session.expires_at)
        .bind(session.id)
        .execute(&self.pool)
        .await
        .map_err(transient)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn list_sessions(&self, filter: SessionFilter, pagination: Pagination) -> StoreResult<Vec<Session>> {
        let status = filter.status.map(|s| encode_enum(&s)).transpose()?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            ORDER BY created_at DESC
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(status)
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(i64::from(pagination.offset))
        .bind(i64::from(pagination.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(transient)?;

        rows.iter().map(session_from_row).collect()
    }

    async fn append_event(
        &self,
        session_id: Uuid,
        kind: SessionEventKind,
        data: serde_json::Value,
    ) -> StoreResult<SessionEvent> {
        let kind_str = encode_enum(&kind)?;
        let row = sqlx::query(
            r#"
            INSERT INTO session_events (id, session_id, kind, data, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(&kind_str)
        .bind(&data)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(transient)?;

        event_from_row(&row)
    }

    async fn list_events(&self, session_id: Uuid) -> StoreResult<Vec<SessionEvent>> {
        let rows = sqlx::query("SELECT * FROM session_events WHERE session_id = $1 ORDER BY timestamp ASC, sequence ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(transient)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn append_metrics(&self, metrics: SessionMetrics) -> StoreResult<SessionMetrics> {
        sqlx::query(
            r#"
            INSERT INTO session_metrics (id, session_id, cpu_percent, memory_mb, rx_bytes, tx_bytes, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(metrics.id)
        .bind(metrics.session_id)
        .bind(metrics.cpu_percent)
        .bind(metrics.memory_mb)
        .bind(metrics.rx_bytes as i64)
        .bind(metrics.tx_bytes as i64)
        .bind(metrics.timestamp)
        .execute(&self.pool)
        .await
        .map_err(transient)?;
        Ok(metrics)
    }

    async fn create_pool(&self, pool: WorkPool) -> StoreResult<WorkPool> {
        let provider = encode_enum(&pool.provider)?;
        let queue_strategy = encode_enum(&pool.queue_strategy)?;
        let default_env = serde_json::to_value(&pool.default_env).map_err(|e| StoreError::Validation(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO work_pools (
                id, name, provider, min_size, max_concurrency, paused, auto_scale, default_image,
                default_env, max_idle_seconds, max_session_duration_seconds, queue_strategy,
                available_size, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(pool.id)
        .bind(&pool.name)
        .bind(&provider)
        .bind(pool.min_size as i32)
        .bind(pool.max_concurrency as i32)
        .bind(pool.paused)
        .bind(pool.auto_scale)
        .bind(&pool.default_image)
        .bind(&default_env)
        .bind(pool.max_idle_seconds as i32)
        .bind(pool.max_session_duration_seconds as i32)
        .bind(&queue_strategy)
        .bind(pool.available_size as i32)
        .bind(pool.created_at)
        .bind(pool.updated_at)
        .execute(&self.pool)
        .await
        .map_err(transient)?;

        Ok(pool)
    }

    async fn get_pool(&self, id: Uuid) -> StoreResult<WorkPool> {
        let row = sqlx::query("SELECT * FROM work_pools WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(transient)?
            .ok_or_else(|| StoreError::NotFound(format!("pool {id}")))?;
        pool_from_row(&row)
    }

    async fn update_pool(&self, pool: WorkPool) -> StoreResult<WorkPool> {
        let default_env = serde_json::to_value(&pool.default_env).map_err(|e| StoreError::Validation(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE work_pools SET
                name = $1, min_size = $2, max_concurrency = $3, paused = $4, auto_scale = $5,
                default_image = $6, default_env = $7, max_idle_seconds = $8,
                max_session_duration_seconds = $9, available_size = $10, updated_at = $11
            WHERE id = $12
            "#,
        )
        .bind(&pool.name)
        .bind(pool.min_size as i32)
        .bind(pool.max_concurrency as i32)
        .bind(pool.paused)
        .bind(pool.auto_scale)
        .bind(&pool.default_image)
        .bind(&default_env)
        .bind(pool.max_idle_seconds as i32)
        .bind(pool.max_session_duration_seconds as i32)
        .bind(pool.available_size as i32)
        .bind(pool.updated_at)
        .bind(pool.id)
        .execute(&self.pool)
        .await
        .map_err(transient)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("pool {}", pool.id)));
        }
        Ok(pool)
    }

    async fn delete_pool(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM work_pools WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn list_pools(&self) -> StoreResult<Vec<WorkPool>> {
        let rows = sqlx::query("SELECT * FROM work_pools ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(transient)?;
        rows.iter().map(pool_from_row).collect()
    }

    async fn create_worker(&self, worker: Worker) -> StoreResult<Worker> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, pool_id, hostname, max_slots, active_sessions, paused, last_beat)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(worker.id)
        .bind(worker.pool_id)
        .bind(&worker.hostname)
        .bind(worker.max_slots as i32)
        .bind(worker.active_sessions as i32)
        .bind(worker.paused)
        .bind(worker.last_beat)
        .execute(&self.pool)
        .await
        .map_err(transient)?;
        Ok(worker)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(transient)?
            .ok_or_else(|| StoreError::NotFound(format!("worker {id}")))?;
        worker_from_row(&row)
    }

    async fn update_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET hostname = $1, max_slots = $2, active_sessions = $3, paused = $4, last_beat = $5
            WHERE id = $6
            "#,
        )
        .bind(&worker.hostname)
        .bind(worker.max_slots as i32)
        .bind(worker.active_sessions as i32)
        .bind(worker.paused)
        .bind(worker.last_beat)
        .bind(worker.id)
        .execute(&self.pool)
        .await
        .map_err(transient)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("worker {}", worker.id)));
        }
        Ok(worker)
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn list_workers_for_pool(&self, pool_id: Uuid) -> StoreResult<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers WHERE pool_id = $1 ORDER BY hostname ASC")
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await
            .map_err(transient)?;
        rows.iter().map(worker_from_row).collect()
    }

    async fn count_sessions_by_status(&self, pool_id: Uuid) -> StoreResult<HashMap<SessionStatus, u32>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sessions WHERE work_pool_id = $1 GROUP BY status")
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await
            .map_err(transient)?;

        let mut counts = HashMap::new();
        for row in &rows {
            let status: SessionStatus = decode_enum(row.try_get::<String, _>("status").map_err(transient)?.as_str())?;
            let n: i64 = row.try_get("n").map_err(transient)?;
            counts.insert(status, n as u32);
        }
        Ok(counts)
    }

    async fn atomic_claim(&self, pool_id: Uuid, claimed_by: &str) -> StoreResult<ClaimOutcome> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await.map_err(transient)?;

        let candidate = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE work_pool_id = $1 AND status = 'available'
            ORDER BY available_at ASC NULLS LAST
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(pool_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(transient)?;

        let Some(row) = candidate else {
            tx.commit().await.map_err(transient)?;
            return Ok(ClaimOutcome::Empty);
        };

        let mut session = session_from_row(&row)?;
        let now = Utc::now();
        session.status = SessionStatus::Claimed;
        session.claimed_by = Some(claimed_by.to_string());
        session.claimed_at = Some(now);
        session.available_at = None;
        session.updated_at = now;

        let status_str = encode_enum(&session.status)?;
        sqlx::query(
            "UPDATE sessions SET status = $1, claimed_by = $2, claimed_at = $3, available_at = NULL, updated_at = $4 WHERE id = $5",
        )
        .bind(&status_str)
        .bind(&session.claimed_by)
        .bind(session.claimed_at)
        .bind(now)
        .bind(session.id)
        .execute(&mut *tx)
        .await
        .map_err(transient)?;

        sqlx::query("UPDATE work_pools SET available_size = GREATEST(available_size - 1, 0), updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(pool_id)
            .execute(&mut *tx)
            .await
            .map_err(transient)?;

        let event_kind = encode_enum(&SessionEventKind::SessionClaimed)?;
        sqlx::query("INSERT INTO session_events (id, session_id, kind, data, timestamp) VALUES ($1,$2,$3,$4,$5)")
            .bind(Uuid::new_v4())
            .bind(session.id)
            .bind(&event_kind)
            .bind(serde_json::json!({ "claimed_by": claimed_by }))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(transient)?;

        tx.commit().await.map_err(transient)?;
        Ok(ClaimOutcome::Claimed(session))
    }

    async fn release(&self, session_id: Uuid, caller: &str) -> StoreResult<Session> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await.map_err(transient)?;

        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(transient)?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        let mut session = session_from_row(&row)?;
        if session.claimed_by.as_deref() != Some(caller) {
            tx.rollback().await.map_err(transient)?;
            return Err(StoreError::Conflict(format!(
                "session {session_id} is not claimed by {caller}"
            )));
        }

        let now = Utc::now();
        if session.is_pooled {
            session.status = SessionStatus::Available;
            session.claimed_by = None;
            session.claimed_at = None;
            session.available_at = Some(now);
        } else {
            session.status = SessionStatus::Terminated;
        }
        session.updated_at = now;

        let status_str = encode_enum(&session.status)?;
        sqlx::query(
            "UPDATE sessions SET status = $1, claimed_by = $2, claimed_at = $3, available_at = $4, updated_at = $5 WHERE id = $6",
        )
        .bind(&status_str)
        .bind(&session.claimed_by)
        .bind(session.claimed_at)
        .bind(session.available_at)
        .bind(now)
        .bind(session.id)
        .execute(&mut *tx)
        .await
        .map_err(transient)?;

        if session.is_pooled {
            if let Some(pool_id) = session.work_pool_id {
                sqlx::query("UPDATE work_pools SET available_size = available_size + 1, updated_at = $1 WHERE id = $2")
                    .bind(now)
                    .bind(pool_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(transient)?;
            }
        }

        tx.commit().await.map_err(transient)?;
        Ok(session)
    }

    async fn mark_worker_sessions_failed(&self, worker_id: Uuid) -> StoreResult<u64> {
        let placeholders = TERMINAL_STATUSES.join("','");
        let query = format!(
            "UPDATE sessions SET status = 'failed', updated_at = now() WHERE worker_id = $1 AND status NOT IN ('{placeholders}')"
        );
        let result = sqlx::query(&query)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self, max_age: chrono::Duration) -> StoreResult<u64> {
        let placeholders = TERMINAL_STATUSES.join("','");
        let cutoff = Utc::now() - max_age;
        let query = format!("DELETE FROM sessions WHERE status IN ('{placeholders}') AND updated_at < $1");
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired_available(&self, pool_id: Uuid, max_idle: chrono::Duration) -> StoreResult<u64> {
        let cutoff = Utc::now() - max_idle;
        let result = sqlx::query(
            "UPDATE sessions SET status = 'expired', updated_at = now() WHERE work_pool_id = $1 AND status = 'available' AND available_at < $2",
        )
        .bind(pool_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(transient)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PoolLookupPort for PostgresStore {
    async fn default_pool_for(&self, provider: ProviderKind) -> StoreResult<WorkPool> {
        let provider_str = encode_enum(&provider)?;
        let existing = sqlx::query("SELECT * FROM work_pools WHERE provider = $1 AND name = 'default' LIMIT 1")
            .bind(&provider_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(transient)?;
        if let Some(row) = existing {
            return pool_from_row(&row);
        }

        let mut pool = WorkPool::new("default", provider, 0, 10).map_err(|e| StoreError::Validation(e.to_string()))?;
        pool.auto_scale = false;
        self.create_pool(pool).await
    }
}
