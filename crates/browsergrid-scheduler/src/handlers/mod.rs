//! Task Scheduler handlers (spec.md §4.5): one struct per `TaskKind`,
//! each decoding its own typed payload out of `Task::payload`
//! (spec.md §9 "Dynamic payloads").

mod cleanup_expired;
mod pool_scale;
mod session_health_check;
mod session_start;
mod session_stop;

pub use cleanup_expired::CleanupExpiredHandler;
pub use pool_scale::PoolScaleHandler;
pub use session_health_check::SessionHealthCheckHandler;
pub use session_start::SessionStartHandler;
pub use session_stop::SessionStopHandler;

use async_trait::async_trait;

use browsergrid_core::ports::outbound::{HandlerOutcome, Task};

/// A handler bound to exactly one `TaskKind`. `browsergrid-cli` wires
/// one of these per entry in the worker's dispatch table.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> HandlerOutcome;
}

/// Decodes `task.payload` into `P`, returning `HandlerOutcome::Fail`
/// directly (a malformed payload is never going to parse on retry) when
/// it doesn't match — shared by every handler below.
pub(crate) fn decode_payload<P: serde::de::DeserializeOwned>(task: &Task) -> Result<P, HandlerOutcome> {
    serde_json::from_value(task.payload.clone()).map_err(|e| {
        tracing::error!(task_id = %task.id, error = %e, "failed to decode task payload");
        HandlerOutcome::Fail
    })
}
