//! Task Scheduler and Pool Reconciler (spec.md §4.5, §4.6).

pub mod handlers;
pub mod reconciler;
pub mod retry;
pub mod worker;

pub use handlers::{
    CleanupExpiredHandler, PoolScaleHandler, SessionHealthCheckHandler, SessionStartHandler, SessionStopHandler,
    TaskHandler,
};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use worker::Worker;
