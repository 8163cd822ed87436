//! Domain entities (spec.md §3).

mod session;
mod session_event;
mod work_pool;
mod worker;

pub use session::{BrowserKind, ProxyConfig, ResourceLimits, ScreenConfig, Session};
pub use session_event::{SessionEvent, SessionMetrics};
pub use work_pool::{ProviderKind, QueueStrategy, WorkPool, WorkPoolError};
pub use worker::Worker;
