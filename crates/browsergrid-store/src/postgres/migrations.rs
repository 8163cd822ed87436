//! Schema bootstrap. Plain `CREATE TABLE IF NOT EXISTS` run at startup
//! rather than a migration framework — the teacher's SQLite repository
//! does the same for the same reason: one process owns the schema and
//! there's no multi-version deployment story yet to justify more.

use sqlx::PgPool;

pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_pools (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            provider TEXT NOT NULL,
            min_size INTEGER NOT NULL,
            max_concurrency INTEGER NOT NULL,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            auto_scale BOOLEAN NOT NULL DEFAULT TRUE,
            default_image TEXT,
            default_env JSONB NOT NULL DEFAULT '{}'::jsonb,
            max_idle_seconds INTEGER NOT NULL,
            max_session_duration_seconds INTEGER NOT NULL,
            queue_strategy TEXT NOT NULL,
            available_size INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            id UUID PRIMARY KEY,
            pool_id UUID NOT NULL REFERENCES work_pools(id) ON DELETE CASCADE,
            hostname TEXT NOT NULL,
            max_slots INTEGER NOT NULL,
            active_sessions INTEGER NOT NULL DEFAULT 0,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            last_beat TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workers_pool_id ON workers(pool_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id UUID PRIMARY KEY,
            browser TEXT NOT NULL,
            browser_version TEXT,
            os TEXT NOT NULL,
            headless BOOLEAN NOT NULL,
            screen JSONB NOT NULL,
            proxy JSONB,
            resources JSONB NOT NULL,
            environment JSONB NOT NULL DEFAULT '{}'::jsonb,
            status TEXT NOT NULL,
            provider TEXT NOT NULL,
            work_pool_id UUID REFERENCES work_pools(id) ON DELETE SET NULL,
            worker_id UUID REFERENCES workers(id) ON DELETE SET NULL,
            ws_endpoint TEXT,
            live_url TEXT,
            is_pooled BOOLEAN NOT NULL,
            claimed_by TEXT,
            claimed_at TIMESTAMPTZ,
            available_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_pool_status ON sessions(work_pool_id, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_worker_id ON sessions(worker_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status_updated_at ON sessions(status, updated_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE SEQUENCE IF NOT EXISTS session_events_sequence")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_events (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            data JSONB NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            sequence BIGINT NOT NULL DEFAULT nextval('session_events_sequence')
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_events_session_id ON session_events(session_id, timestamp, sequence)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_metrics (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            cpu_percent DOUBLE PRECISION NOT NULL,
            memory_mb DOUBLE PRECISION NOT NULL,
            rx_bytes BIGINT NOT NULL,
            tx_bytes BIGINT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_metrics_session_id ON session_metrics(session_id, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}
