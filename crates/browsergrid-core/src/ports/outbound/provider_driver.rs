//! Provider Driver port (spec.md §6): the narrow contract the Task
//! Scheduler uses to provision and tear down a session on whatever
//! compute provider a work pool targets. Per-provider implementation
//! detail (container engines, cloud container APIs, local process
//! supervision) is an external collaborator — this crate only pins down
//! the interface.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::Session;

/// Errors surfaced by a provider driver. These map to spec.md §7's
/// `ProviderFailure` error kind.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider refused: {0}")]
    Refused(String),

    #[error("browser failed to start: {0}")]
    StartupFailed(String),

    #[error("health check failed: {0}")]
    Unhealthy(String),

    #[error("transient provider error: {0}")]
    Transient(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The endpoints a provider hands back once a session's browser is up.
#[derive(Debug, Clone)]
pub struct ProvisionedEndpoints {
    pub ws_endpoint: String,
    pub live_url: String,
}

/// A point-in-time resource sample for a running session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderMetricsSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Outbound port for a compute provider capable of running a session's
/// browser.
#[async_trait]
pub trait ProviderDriverPort: Send + Sync {
    /// Which `WorkPool::provider` this driver serves.
    fn provider_name(&self) -> &str;

    /// Provisions the browser described by `session` and returns its
    /// reachable endpoints.
    async fn start(&self, session: &Session) -> ProviderResult<ProvisionedEndpoints>;

    /// Tears down the session's browser.
    async fn stop(&self, session: &Session) -> ProviderResult<()>;

    /// Probes whether the session's browser is still healthy.
    async fn health(&self, session: &Session) -> ProviderResult<()>;

    /// Samples current resource usage for the session.
    async fn metrics(&self, session: &Session) -> ProviderResult<ProviderMetricsSample>;
}
