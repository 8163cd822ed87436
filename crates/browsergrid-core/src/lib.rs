//! # BrowserGrid Core
//!
//! Domain model, Session State Machine, Pool Claim Protocol, and port
//! definitions for BrowserGrid's session-lifecycle control plane. This
//! crate follows hexagonal architecture: ports define the boundary,
//! adapters (in `browsergrid-store`, `browsergrid-broker`,
//! `browsergrid-providers`) implement them.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::ControlPlaneError;
