//! Error taxonomy (spec.md §7) — kinds, not types. Every crate in the
//! workspace defines its own `thiserror` error enums at the seam it
//! owns; this enum is the shared vocabulary the HTTP API and the
//! scheduler's retry policy classify those errors into.

use thiserror::Error;

use crate::ports::outbound::{BrokerError, ProviderError, StoreError};

/// A control-plane error classified into one of spec.md §7's kinds.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Rejected payload; returned to the caller as a 4xx-equivalent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Optimistic/atomic claim lost, unique-name violation; caller may
    /// retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown id; non-retriable.
    #[error("not found: {0}")]
    NotFound(String),

    /// Broker/database/network hiccup; retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// The upstream provider refused or the browser failed.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// Invariants violated; logged, session marked failed, loop
    /// continues.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ControlPlaneError {
    /// Whether a task handler should retry after this error
    /// (spec.md §7 "Propagation policy").
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ProviderFailure(_))
    }
}

impl From<StoreError> for ControlPlaneError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => Self::NotFound(m),
            StoreError::Conflict(m) => Self::Conflict(m),
            StoreError::Validation(m) => Self::Validation(m),
            StoreError::Transient(m) => Self::Transient(m),
        }
    }
}

impl From<BrokerError> for ControlPlaneError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::QueueNotFound(m) => Self::Validation(format!("unknown queue: {m}")),
            BrokerError::DuplicateUniqueKey(m) => Self::Conflict(m),
            BrokerError::Transient(m) => Self::Transient(m),
        }
    }
}

impl From<ProviderError> for ControlPlaneError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Refused(m) | ProviderError::StartupFailed(m) | ProviderError::Unhealthy(m) => {
                Self::ProviderFailure(m)
            }
            ProviderError::Transient(m) => Self::Transient(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_provider_failures_are_retriable() {
        assert!(ControlPlaneError::Transient("x".into()).is_retriable());
        assert!(ControlPlaneError::ProviderFailure("x".into()).is_retriable());
        assert!(!ControlPlaneError::NotFound("x".into()).is_retriable());
        assert!(!ControlPlaneError::Validation("x".into()).is_retriable());
    }
}
