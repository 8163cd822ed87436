//! Pool Lookup port (spec.md §9 "Dependency inversion for pool lookup").
//!
//! Session creation needs to "get or create a default pool for provider
//! P" without the sessions code importing the store crate directly (that
//! would cycle: store -> core -> store). This narrow interface is the
//! one thing session-creation code depends on; `browsergrid-store`
//! implements it alongside `MetadataStorePort`.

use async_trait::async_trait;

use crate::domain::entities::{ProviderKind, WorkPool};
use crate::ports::outbound::StoreResult;

#[async_trait]
pub trait PoolLookupPort: Send + Sync {
    /// Returns the default pool for `provider`, creating one with
    /// conservative defaults (`min_size = 0`, `auto_scale = false`) if
    /// none exists yet.
    async fn default_pool_for(&self, provider: ProviderKind) -> StoreResult<WorkPool>;
}
