//! Shared application state.

use std::sync::Arc;

use browsergrid_core::ports::outbound::{MetadataStorePort, PoolLookupPort, TaskBrokerPort};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStorePort>,
    pub pool_lookup: Arc<dyn PoolLookupPort>,
    pub broker: Arc<dyn TaskBrokerPort>,
    pub api_key: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn MetadataStorePort>,
        pool_lookup: Arc<dyn PoolLookupPort>,
        broker: Arc<dyn TaskBrokerPort>,
        api_key: Option<String>,
    ) -> Self {
        Self { store, pool_lookup, broker, api_key }
    }
}
