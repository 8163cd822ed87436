//! Work pool entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Compute provider a pool's workers run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Container,
    CloudContainer,
    Local,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::CloudContainer => write!(f, "cloud-container"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Queue dispatch strategy for a pool. `Fifo` is the only required value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStrategy {
    #[default]
    Fifo,
}

/// A group of workers for a provider.
///
/// Invariant: `0 <= min_size <= max_concurrency`. `provider` is immutable
/// once the pool is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPool {
    pub id: Uuid,
    pub name: String,
    pub provider: ProviderKind,
    pub min_size: u32,
    pub max_concurrency: u32,
    pub paused: bool,
    pub auto_scale: bool,
    pub default_image: Option<String>,
    pub default_env: HashMap<String, String>,
    pub max_idle_seconds: u32,
    pub max_session_duration_seconds: u32,
    pub queue_strategy: QueueStrategy,
    /// Sessions currently available (unclaimed, pooled). Owned by the
    /// Reconciler; only mutated inside claim/release/reconcile transactions.
    pub available_size: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Error constructing a `WorkPool` whose invariants don't hold.
#[derive(Debug, thiserror::Error)]
pub enum WorkPoolError {
    #[error("min_size ({min_size}) must be <= max_concurrency ({max_concurrency})")]
    MinExceedsMax { min_size: u32, max_concurrency: u32 },
}

impl WorkPool {
    /// Creates a new pool, validating `min_size <= max_concurrency`.
    pub fn new(
        name: impl Into<String>,
        provider: ProviderKind,
        min_size: u32,
        max_concurrency: u32,
    ) -> Result<Self, WorkPoolError> {
        if min_size > max_concurrency {
            return Err(WorkPoolError::MinExceedsMax {
                min_size,
                max_concurrency,
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            provider,
            min_size,
            max_concurrency,
            paused: false,
            auto_scale: true,
            default_image: None,
            default_env: HashMap::new(),
            max_idle_seconds: 300,
            max_session_duration_seconds: 3600,
            queue_strategy: QueueStrategy::default(),
            available_size: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// The provider-kind-scoped task queue this pool's work lands on (§4.2).
    #[must_use]
    pub fn queue_name(&self) -> &'static str {
        match self.provider {
            ProviderKind::Container => "default",
            ProviderKind::CloudContainer => "cloud",
            ProviderKind::Local => "local",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_min_greater_than_max() {
        let err = WorkPool::new("p", ProviderKind::Container, 5, 2).unwrap_err();
        assert!(matches!(err, WorkPoolError::MinExceedsMax { .. }));
    }

    #[test]
    fn queue_name_follows_provider() {
        let p = WorkPool::new("p", ProviderKind::CloudContainer, 0, 10).unwrap();
        assert_eq!(p.queue_name(), "cloud");
    }
}
