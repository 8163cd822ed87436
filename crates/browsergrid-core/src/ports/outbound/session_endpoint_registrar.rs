//! Session Endpoint Registrar port (spec.md §9 "Dependency inversion for
//! pool lookup" — the same pattern applied to the CDP Multiplexer): the
//! Task Scheduler needs to tell the mux "this session's browser is now
//! reachable at this WebSocket URL" without `browsergrid-scheduler`
//! depending on `browsergrid-mux` directly. `browsergrid-mux`'s
//! `MuxState` implements this; `browsergrid-cli` wires the concrete
//! instance into the scheduler's handlers at startup.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("upstream CDP endpoint unreachable: {0}")]
    UpstreamUnreachable(String),
}

pub type RegistrarResult<T> = Result<T, RegistrarError>;

#[async_trait]
pub trait SessionEndpointRegistrarPort: Send + Sync {
    /// Dials `ws_endpoint` and registers the session so `/devtools/*`
    /// and `/json*` requests for `session_id` have somewhere to go.
    async fn connect_session(&self, session_id: Uuid, ws_endpoint: &str, live_url: &str) -> RegistrarResult<()>;

    /// Tears down the mux's registration for `session_id`, closing every
    /// attached client socket (spec.md §4.7 "Upstream disconnect closes
    /// all client sockets with a normal close code").
    async fn disconnect_session(&self, session_id: Uuid);
}
