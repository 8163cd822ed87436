//! Outbound ports (driven): how the control plane depends on its
//! external collaborators — the database, the broker, and compute
//! providers.

mod metadata_store;
mod pool_lookup;
mod provider_driver;
mod session_endpoint_registrar;
mod task_broker;

pub use metadata_store::{
    ClaimOutcome, MetadataStorePort, Pagination, SessionFilter, StoreError, StoreResult,
};
pub use pool_lookup::PoolLookupPort;
pub use provider_driver::{ProviderDriverPort, ProviderError, ProviderMetricsSample, ProviderResult, ProvisionedEndpoints};
pub use session_endpoint_registrar::{RegistrarError, RegistrarResult, SessionEndpointRegistrarPort};
pub use task_broker::{
    BrokerError, BrokerResult, EnqueueOptions, HandlerOutcome, QueueStats, Task, TaskBrokerPort, TaskKind,
};
