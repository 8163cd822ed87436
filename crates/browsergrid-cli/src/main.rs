//! BrowserGrid binary entry point: loads configuration, wires the
//! Metadata Store, Task Broker, Provider Drivers, Task Scheduler
//! workers, Pool Reconciler, HTTP/REST control plane, and CDP
//! Multiplexer into one running process (spec.md §2, §9).

mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use browsergrid_api::{ApiGateway, AppState, GatewayConfig};
use browsergrid_broker::{MemoryBroker, RedisBroker};
use browsergrid_core::ports::outbound::{
    MetadataStorePort, PoolLookupPort, ProviderDriverPort, SessionEndpointRegistrarPort, TaskBrokerPort, TaskKind,
};
use browsergrid_mux::{router as mux_router, MuxRegistrar, MuxState, WebhookManager};
use browsergrid_providers::{CloudContainerDriver, ContainerDriver, LocalProcessDriver};
use browsergrid_scheduler::{
    CleanupExpiredHandler, PoolScaleHandler, Reconciler, ReconcilerConfig, SessionHealthCheckHandler, SessionStartHandler,
    SessionStopHandler, TaskHandler, Worker as SchedulerWorker,
};
use browsergrid_store::{MemoryStore, PostgresStore};
use config::Config;
use tokio_util::sync::CancellationToken;

/// `pool.scale` and `cleanup.expired` run on this low-parallelism queue
/// (spec.md §4.2 "scheduler — pool scaling and cleanup tasks").
const SCHEDULER_QUEUE: &str = "scheduler";
/// Per-provider data-plane queues (spec.md §4.2).
const CONTAINER_QUEUE: &str = "default";
const CLOUD_QUEUE: &str = "cloud";
const LOCAL_QUEUE: &str = "local";
const CLEANUP_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const CLEANUP_MAX_AGE_HOURS: u32 = 24;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "browsergrid=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!(port = config.port, "starting BrowserGrid");

    let (store, pool_lookup) = build_store(&config).await?;
    let broker = build_broker(&config).await?;

    let cancel = CancellationToken::new();

    let webhooks = Arc::new(WebhookManager::new());
    let mux_state = Arc::new(MuxState::new(webhooks).with_max_message_size(config.max_message_size));
    let registrar: Arc<dyn SessionEndpointRegistrarPort> = Arc::new(MuxRegistrar(Arc::clone(&mux_state)));

    spawn_schedulers(&config, Arc::clone(&store), Arc::clone(&broker), Arc::clone(&registrar), cancel.clone());
    spawn_reconciler(Arc::clone(&store), Arc::clone(&broker), cancel.clone());
    spawn_cleanup_sweeper(Arc::clone(&broker), cancel.clone());

    let app_state = AppState::new(Arc::clone(&store), pool_lookup, Arc::clone(&broker), config.api_key.clone());
    let gateway = ApiGateway::new(GatewayConfig { port: config.port, ..GatewayConfig::default() }, app_state);

    let app: Router = gateway.build_router().merge(mux_router(mux_state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "BrowserGrid API + CDP mux listening");

    let drain_deadline = config.connection_timeout();
    let shutdown_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_cancel))
            .await
    });

    // spec.md §5 "HTTP shutdown drains within a configurable deadline
    // (default 30 s)": once the shutdown signal has fired and in-flight
    // requests are draining, stop waiting past `drain_deadline` rather
    // than block process exit forever on a stuck connection. The watcher
    // only starts its clock once `cancel` actually fires, so normal
    // long-running operation is never bounded by this deadline.
    let abort_handle = server.abort_handle();
    let watcher = tokio::spawn(async move {
        cancel.cancelled().await;
        tokio::time::sleep(drain_deadline).await;
        abort_handle.abort();
    });

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) if e.is_cancelled() => error!(?drain_deadline, "connections still draining past deadline, forced exit"),
        Err(e) => return Err(e.into()),
    }
    watcher.abort();

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining");
    cancel.cancel();
}

type StorePorts = (Arc<dyn MetadataStorePort>, Arc<dyn PoolLookupPort>);

async fn build_store(config: &Config) -> anyhow::Result<StorePorts> {
    match &config.database_url {
        Some(url) => {
            info!("connecting to Postgres metadata store");
            let store = Arc::new(PostgresStore::connect(url, 10).await?);
            Ok((store.clone(), store))
        }
        None => {
            warn!("DATABASE_URL not set, falling back to in-memory metadata store");
            let store = Arc::new(MemoryStore::default());
            Ok((store.clone(), store))
        }
    }
}

async fn build_broker(config: &Config) -> anyhow::Result<Arc<dyn TaskBrokerPort>> {
    match config.redis_url() {
        Some(url) => {
            info!("connecting to Redis task broker");
            Ok(Arc::new(RedisBroker::connect(&url).await?))
        }
        None => {
            warn!("REDIS_ADDR not set, falling back to in-memory task broker");
            Ok(Arc::new(MemoryBroker::default()))
        }
    }
}

/// One `SchedulerWorker` per provider queue (each bound to that
/// provider's driver, carrying every handler whose task might land on
/// that queue — `pool.scale` and `session.start/stop/health-check` all
/// dispatch to the pool's own `queue_name()`, spec.md §4.5), plus a
/// `scheduler` queue worker for `cleanup.expired`.
fn spawn_schedulers(
    config: &Config,
    store: Arc<dyn MetadataStorePort>,
    broker: Arc<dyn TaskBrokerPort>,
    registrar: Arc<dyn SessionEndpointRegistrarPort>,
    cancel: CancellationToken,
) {
    let local_driver: Arc<dyn ProviderDriverPort> = Arc::new(LocalProcessDriver::new(config.browser_url.clone(), 9222));
    let container_driver: Arc<dyn ProviderDriverPort> = Arc::new(ContainerDriver::new("unconfigured-container-engine"));
    let cloud_driver: Arc<dyn ProviderDriverPort> = Arc::new(CloudContainerDriver::new("unconfigured-region"));

    for (queue, driver) in [
        (CONTAINER_QUEUE, container_driver),
        (CLOUD_QUEUE, cloud_driver),
        (LOCAL_QUEUE, local_driver),
    ] {
        let handlers = provider_queue_handlers(Arc::clone(&store), Arc::clone(&broker), driver, Arc::clone(&registrar));
        spawn_workers(queue, Arc::clone(&broker), handlers, config.worker_concurrency, cancel.clone());
    }

    let mut scheduler_handlers: HashMap<TaskKind, Arc<dyn TaskHandler>> = HashMap::new();
    scheduler_handlers.insert(TaskKind::CleanupExpired, Arc::new(CleanupExpiredHandler::new(Arc::clone(&store))));
    spawn_workers(SCHEDULER_QUEUE, broker, scheduler_handlers, config.worker_concurrency, cancel);
}

fn provider_queue_handlers(
    store: Arc<dyn MetadataStorePort>,
    broker: Arc<dyn TaskBrokerPort>,
    driver: Arc<dyn ProviderDriverPort>,
    registrar: Arc<dyn SessionEndpointRegistrarPort>,
) -> HashMap<TaskKind, Arc<dyn TaskHandler>> {
    let mut handlers: HashMap<TaskKind, Arc<dyn TaskHandler>> = HashMap::new();
    handlers.insert(TaskKind::PoolScale, Arc::new(PoolScaleHandler::new(Arc::clone(&store), broker)));
    handlers.insert(
        TaskKind::SessionStart,
        Arc::new(
            SessionStartHandler::new(Arc::clone(&store), Arc::clone(&driver)).with_registrar(Arc::clone(&registrar)),
        ),
    );
    handlers.insert(
        TaskKind::SessionStop,
        Arc::new(SessionStopHandler::new(Arc::clone(&store), Arc::clone(&driver)).with_registrar(registrar)),
    );
    handlers.insert(TaskKind::SessionHealthCheck, Arc::new(SessionHealthCheckHandler::new(store, driver)));
    handlers
}

/// Spawns `concurrency` task-worker threads sharing one dispatch table,
/// all contending on the same queue (spec.md §5 "N task-worker threads
/// per queue (configurable, default small — 5–10)").
fn spawn_workers(
    queue: &'static str,
    broker: Arc<dyn TaskBrokerPort>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    concurrency: u32,
    cancel: CancellationToken,
) {
    let worker = Arc::new(SchedulerWorker::new(queue, broker, handlers));
    for worker_index in 0..concurrency.max(1) {
        let worker = Arc::clone(&worker);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            info!(queue, worker_index, "scheduler worker starting");
            worker.run(cancel).await;
            info!(queue, worker_index, "scheduler worker drained and stopped");
        });
    }
}

fn spawn_reconciler(store: Arc<dyn MetadataStorePort>, broker: Arc<dyn TaskBrokerPort>, cancel: CancellationToken) {
    let reconciler = Reconciler::new(store, broker, ReconcilerConfig::default());
    tokio::spawn(async move {
        info!("pool reconciler starting");
        reconciler.run(cancel).await;
        info!("pool reconciler stopped");
    });
}

/// `cleanup.expired` (spec.md §4.5) has no other caller in this process;
/// sweep once an hour so terminal sessions don't accumulate forever.
fn spawn_cleanup_sweeper(broker: Arc<dyn TaskBrokerPort>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(CLEANUP_SWEEP_INTERVAL) => {}
            }
            let payload = serde_json::json!({ "max_age_hours": CLEANUP_MAX_AGE_HOURS });
            if let Err(e) = broker
                .enqueue(SCHEDULER_QUEUE, TaskKind::CleanupExpired, payload, Default::default())
                .await
            {
                warn!(error = %e, "failed to enqueue periodic cleanup.expired");
            }
        }
    });
}
