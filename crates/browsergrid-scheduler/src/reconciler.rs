//! Pool Reconciler (spec.md §4.6): a control loop that keeps each pool's
//! session count near `min_size`, sweeps dead workers, and expires idle
//! pooled sessions — all driven off `MetadataStorePort`'s aggregate
//! queries rather than duplicating bookkeeping in the scheduler.

use std::sync::Arc;
use std::time::Duration;

use browsergrid_core::domain::entities::WorkPool;
use browsergrid_core::domain::state_machine::SessionStatus;
use browsergrid_core::ports::outbound::{
    EnqueueOptions, MetadataStorePort, TaskBrokerPort, TaskKind,
};
use tokio_util::sync::CancellationToken;

/// Cadence knobs. `heartbeat_interval` governs both the Worker Fleet's
/// own online/offline judgment (spec.md §4 "Worker Fleet") and the dead-worker
/// sweep below (`3 * heartbeat_interval`, spec.md §4.6 step 7).
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub tick_interval: Duration,
    pub heartbeat_interval: chrono::Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            heartbeat_interval: chrono::Duration::seconds(30),
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn MetadataStorePort>,
    broker: Arc<dyn TaskBrokerPort>,
    config: ReconcilerConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStorePort>, broker: Arc<dyn TaskBrokerPort>, config: ReconcilerConfig) -> Self {
        Self { store, broker, config }
    }

    /// Runs one tick against every non-paused pool, staggering the first
    /// tick of each pool across the interval so a large fleet doesn't hit
    /// the store all at once.
    pub async fn run(&self, cancel: CancellationToken) {
        let pools = match self.store.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                tracing::error!(error = %e, "reconciler: failed to list pools on startup");
                return;
            }
        };

        let mut handles = Vec::new();
        for (idx, pool) in pools.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            let broker = Arc::clone(&self.broker);
            let config = self.config;
            let cancel = cancel.clone();
            let stagger = config.tick_interval / (idx as u32 + 1).max(1);
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(stagger) => {}
                }
                let mut ticker = tokio::time::interval(config.tick_interval);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = tick_pool(&store, &broker, pool.id, config).await {
                                tracing::warn!(pool_id = %pool.id, error = %e, "reconciler: tick failed");
                            }
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn tick_pool(
    store: &Arc<dyn MetadataStorePort>,
    broker: &Arc<dyn TaskBrokerPort>,
    pool_id: uuid::Uuid,
    config: ReconcilerConfig,
) -> Result<(), browsergrid_core::ports::outbound::StoreError> {
    let pool = store.get_pool(pool_id).await?;
    if pool.paused {
        return Ok(());
    }

    let counts = store.count_sessions_by_status(pool_id).await?;
    let active: u32 = [
        SessionStatus::Pending,
        SessionStatus::Starting,
        SessionStatus::Available,
        SessionStatus::Claimed,
        SessionStatus::Running,
        SessionStatus::Idle,
    ]
    .iter()
    .map(|s| counts.get(s).copied().unwrap_or(0))
    .sum();
    let available = counts.get(&SessionStatus::Available).copied().unwrap_or(0);

    sync_available_size(store, &pool, available).await;

    let deficit = if pool.auto_scale {
        pool.min_size.saturating_sub(available)
    } else {
        0
    };
    let headroom = pool.max_concurrency.saturating_sub(active);
    let to_create = deficit.min(headroom);

    if to_create > 0 {
        let payload = serde_json::json!({ "pool_id": pool_id, "desired": to_create });
        let options = EnqueueOptions {
            unique_key: Some(format!("scale:{pool_id}")),
            ..Default::default()
        };
        if let Err(e) = broker.enqueue(pool.queue_name(), TaskKind::PoolScale, payload, options).await {
            tracing::warn!(pool_id = %pool_id, error = %e, "reconciler: failed to enqueue pool.scale");
        }
    }

    sweep_dead_workers(store, pool_id, config.heartbeat_interval).await;

    let max_idle = chrono::Duration::seconds(i64::from(pool.max_idle_seconds));
    if let Err(e) = store.cleanup_expired_available(pool_id, max_idle).await {
        tracing::warn!(pool_id = %pool_id, error = %e, "reconciler: cleanup_expired_available failed");
    }

    Ok(())
}

/// Pool counters are owned by the reconciler (spec.md §3): recompute
/// `available_size` from ground truth each tick rather than trust
/// incremental updates elsewhere to stay perfectly in sync.
async fn sync_available_size(store: &Arc<dyn MetadataStorePort>, pool: &WorkPool, available: u32) {
    if pool.available_size == available {
        return;
    }
    let mut updated = pool.clone();
    updated.available_size = available;
    if let Err(e) = store.update_pool(updated).await {
        tracing::warn!(pool_id = %pool.id, error = %e, "reconciler: failed to sync available_size");
    }
}

async fn sweep_dead_workers(store: &Arc<dyn MetadataStorePort>, pool_id: uuid::Uuid, heartbeat_interval: chrono::Duration) {
    let workers = match store.list_workers_for_pool(pool_id).await {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(pool_id = %pool_id, error = %e, "reconciler: failed to list workers");
            return;
        }
    };

    let now = chrono::Utc::now();
    for worker in workers {
        if !worker.is_dead(now, heartbeat_interval) {
            continue;
        }
        tracing::warn!(worker_id = %worker.id, pool_id = %pool_id, "reconciler: worker presumed dead, failing its sessions");
        if let Err(e) = store.mark_worker_sessions_failed(worker.id).await {
            tracing::warn!(worker_id = %worker.id, error = %e, "reconciler: failed to fail worker's sessions");
        }
    }
}
