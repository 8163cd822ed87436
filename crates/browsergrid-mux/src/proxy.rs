//! The axum-facing half of the CDP Multiplexer (spec.md §4.7): the
//! WebSocket upgrade handler for `/devtools/*`, the HTTP handlers for
//! the `/json*` CDP discovery endpoints, and the upstream connection
//! that ties a `SessionMux` to a real browser.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use browsergrid_core::ports::outbound::{RegistrarError, RegistrarResult, SessionEndpointRegistrarPort};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use uuid::Uuid;

use crate::error::{MuxError, MuxResult};
use crate::rewrite::rewrite_response;
use crate::session_mux::{classify, MessageKind, SessionMux};
use crate::webhook::{WebhookKind, WebhookManager};

/// WebSocket close code for a normal, caller-initiated close (RFC 6455
/// §7.4.1) — used when the upstream browser disconnects and every
/// client socket is closed in response (spec.md §4.7).
const NORMAL_CLOSURE: u16 = 1000;

/// One active session: its client-facing mux plus the mailbox that
/// serializes writes to the single upstream socket (spec.md §5 "CDP
/// upstream socket — writes serialized via the per-session mailbox").
struct UpstreamSession {
    mux: Arc<SessionMux>,
    upstream_http_base: String,
    mailbox: mpsc::UnboundedSender<UpstreamMessage>,
}

const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

pub struct MuxState {
    sessions: RwLock<HashMap<Uuid, Arc<UpstreamSession>>>,
    webhooks: Arc<WebhookManager>,
    http: reqwest::Client,
    max_message_size: usize,
}

impl Default for MuxState {
    fn default() -> Self {
        Self::new(Arc::new(WebhookManager::new()))
    }
}

impl MuxState {
    #[must_use]
    pub fn new(webhooks: Arc<WebhookManager>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            webhooks,
            http: reqwest::Client::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Overrides the per-message byte cap applied to client WebSocket
    /// frames (`MAX_MESSAGE_SIZE`, spec.md §6).
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Dials the upstream browser's CDP WebSocket and spins up its
    /// reader task, registering the session for client attachment.
    /// `upstream_ws_url` and `upstream_http_base` come from the
    /// `ProvisionedEndpoints` the Task Scheduler recorded for the
    /// session. Requires `Arc<Self>` so the reader task can evict the
    /// session from `self.sessions` once the upstream disconnects.
    pub async fn connect_session_mux(
        self: &Arc<Self>,
        session_id: Uuid,
        upstream_ws_url: &str,
        upstream_http_base: &str,
    ) -> MuxResult<()> {
        let (stream, _response) = tokio_tungstenite::connect_async(upstream_ws_url)
            .await
            .map_err(|e| MuxError::UpstreamUnreachable(e.to_string()))?;
        let (mut upstream_write, mut upstream_read) = stream.split();

        let mux = Arc::new(SessionMux::new(session_id));
        let (mailbox_tx, mut mailbox_rx) = mpsc::unbounded_channel::<UpstreamMessage>();

        tokio::spawn(async move {
            while let Some(msg) = mailbox_rx.recv().await {
                if upstream_write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_mux = Arc::clone(&mux);
        let webhooks = Arc::clone(&self.webhooks);
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = upstream_read.next().await {
                match frame {
                    Ok(UpstreamMessage::Text(text)) => {
                        handle_upstream_frame(&reader_mux, &webhooks, &text).await;
                    }
                    Ok(UpstreamMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::warn!(session_id = %reader_mux.session_id, "upstream disconnected, closing all client sockets");
            reader_mux.close_all().await;
            state.disconnect_session(reader_mux.session_id).await;
        });

        self.sessions.write().await.insert(
            session_id,
            Arc::new(UpstreamSession {
                mux,
                upstream_http_base: upstream_http_base.trim_end_matches('/').to_string(),
                mailbox: mailbox_tx,
            }),
        );
        Ok(())
    }

    pub async fn disconnect_session(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
    }

    async fn session(&self, session_id: Uuid) -> Option<Arc<UpstreamSession>> {
        self.sessions.read().await.get(&session_id).cloned()
    }
}

/// Adapts `Arc<MuxState>` to the core's `SessionEndpointRegistrarPort`
/// (spec.md §9 "Dependency inversion for pool lookup" applied to the
/// mux): `connect_session_mux` needs `Arc<Self>` to hand its reader task
/// a handle back to `disconnect_session`, which the port's `&self`
/// signature can't express directly.
pub struct MuxRegistrar(pub Arc<MuxState>);

#[async_trait]
impl SessionEndpointRegistrarPort for MuxRegistrar {
    async fn connect_session(&self, session_id: Uuid, ws_endpoint: &str, live_url: &str) -> RegistrarResult<()> {
        self.0
            .connect_session_mux(session_id, ws_endpoint, live_url)
            .await
            .map_err(|e| RegistrarError::UpstreamUnreachable(e.to_string()))
    }

    async fn disconnect_session(&self, session_id: Uuid) {
        self.0.disconnect_session(session_id).await;
    }
}

async fn handle_upstream_frame(mux: &Arc<SessionMux>, webhooks: &Arc<WebhookManager>, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        tracing::warn!(session_id = %mux.session_id, "malformed JSON from upstream, dropping frame");
        return;
    };
    let id = value.get("id").and_then(Value::as_i64);
    let method = value.get("method").and_then(Value::as_str);
    let params = value.get("params");

    match classify(id, method) {
        Some(MessageKind::Event) => {
            webhooks.dispatch(WebhookKind::CdpEvent, method, params, &value).await;
            mux.broadcast(value).await;
        }
        Some(MessageKind::Response) => {
            if let Some(upstream_id) = id {
                mux.route_response(upstream_id, value).await;
            }
        }
        _ => {
            tracing::warn!(session_id = %mux.session_id, "unclassifiable message from upstream");
        }
    }
}

/// Builds the router for the CDP data plane: the WebSocket endpoint and
/// the `/json*` discovery endpoints (spec.md §6 "CDP data plane").
pub fn router(state: Arc<MuxState>) -> Router {
    Router::new()
        .route("/devtools/:session_id/*rest", get(ws_handler))
        .route("/devtools/:session_id", get(ws_handler))
        .route("/json/version/:session_id", get(json_version))
        .route("/json/:session_id", get(json_list))
        .route("/json/list/:session_id", get(json_list))
        .route("/json/new/:session_id", get(json_new))
        .route("/json/activate/:session_id/:target_id", get(json_activate))
        .route("/json/close/:session_id/:target_id", get(json_close))
        .route("/json/protocol/:session_id", get(json_protocol))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<MuxState>>,
    Path(params): Path<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session_id) = params.get("session_id").and_then(|s| s.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    };
    let Some(session) = state.session(session_id).await else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let webhooks = Arc::clone(&state.webhooks);
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_client_socket(socket, session, webhooks))
}

async fn handle_client_socket(socket: WebSocket, session: Arc<UpstreamSession>, webhooks: Arc<WebhookManager>) {
    let (client_id, queue) = session.mux.register_client().await;
    webhooks
        .dispatch(WebhookKind::ClientConnected, None, None, &serde_json::json!({"client_id": client_id}))
        .await;

    let (mut client_write, mut client_read) = socket.split();

    let writer_queue = Arc::clone(&queue);
    let writer_task = tokio::spawn(async move {
        loop {
            let Some(msg) = writer_queue.pop().await else {
                // `close()` fired and the queue drained: the upstream
                // disconnected, so close this client with a normal code
                // (spec.md §4.7 "Upstream disconnect closes all client
                // sockets with a normal close code").
                let _ = client_write
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: NORMAL_CLOSURE,
                        reason: "upstream disconnected".into(),
                    })))
                    .await;
                break;
            };
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if client_write.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = client_read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                handle_client_frame(&session, &webhooks, client_id, &text).await;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer_task.abort();
    session.mux.deregister_client(client_id).await;
    webhooks
        .dispatch(WebhookKind::ClientDisconnected, None, None, &serde_json::json!({"client_id": client_id}))
        .await;
}

async fn handle_client_frame(session: &Arc<UpstreamSession>, webhooks: &Arc<WebhookManager>, client_id: Uuid, text: &str) {
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        tracing::warn!(client_id = %client_id, "malformed JSON from client, dropping frame");
        return;
    };
    let original_id = value.get("id").cloned().unwrap_or(Value::Null);
    let id = value.get("id").and_then(Value::as_i64);
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let params = value.get("params").cloned();

    if classify(id, method.as_deref()) != Some(MessageKind::Command) {
        tracing::warn!(client_id = %client_id, "client sent a non-command frame, ignoring");
        return;
    }

    webhooks
        .dispatch(WebhookKind::CdpCommand, method.as_deref(), params.as_ref(), &value)
        .await;

    let upstream_id = session.mux.tag_command(client_id, original_id).await;
    if let Value::Object(obj) = &mut value {
        obj.insert("id".to_string(), Value::from(upstream_id));
    }
    let Ok(text) = serde_json::to_string(&value) else { return };
    let _ = session.mailbox.send(UpstreamMessage::Text(text));
}

async fn fetch_and_rewrite(state: &MuxState, session_id: Uuid, path_suffix: &str, public_host: &str) -> Response {
    let Some(session) = state.session(session_id).await else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let url = format!("{}{}", session.upstream_http_base, path_suffix);
    let resp = match state.http.get(&url).send().await {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_GATEWAY, format!("upstream unreachable: {e}")).into_response(),
    };
    let mut body: Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_GATEWAY, format!("upstream returned non-JSON: {e}")).into_response(),
    };
    rewrite_response(&mut body, public_host);
    Json(body).into_response()
}

fn public_host_of(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

async fn json_version(State(state): State<Arc<MuxState>>, Path(session_id): Path<Uuid>, headers: HeaderMap) -> Response {
    fetch_and_rewrite(&state, session_id, "/json/version", &public_host_of(&headers)).await
}

async fn json_list(State(state): State<Arc<MuxState>>, Path(session_id): Path<Uuid>, headers: HeaderMap) -> Response {
    fetch_and_rewrite(&state, session_id, "/json/list", &public_host_of(&headers)).await
}

async fn json_new(State(state): State<Arc<MuxState>>, Path(session_id): Path<Uuid>, headers: HeaderMap) -> Response {
    fetch_and_rewrite(&state, session_id, "/json/new", &public_host_of(&headers)).await
}

/// `/json/activate|close|protocol` are transparently proxied with no URL
/// rewriting (spec.md §4.7: "All other HTTP CDP endpoints... are
/// transparently proxied").
async fn json_passthrough(state: &MuxState, session_id: Uuid, upstream_suffix: &str) -> Response {
    let Some(session) = state.session(session_id).await else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let url = format!("{}{}", session.upstream_http_base, upstream_suffix);
    match state.http.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            match resp.text().await {
                Ok(body) => (status, body).into_response(),
                Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream body read failed: {e}")).into_response(),
            }
        }
        Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream unreachable: {e}")).into_response(),
    }
}

async fn json_activate(State(state): State<Arc<MuxState>>, Path(params): Path<HashMap<String, String>>) -> Response {
    let Some(session_id) = params.get("session_id").and_then(|s| s.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    };
    let target_id = params.get("target_id").cloned().unwrap_or_default();
    json_passthrough(&state, session_id, &format!("/json/activate/{target_id}")).await
}

async fn json_close(State(state): State<Arc<MuxState>>, Path(params): Path<HashMap<String, String>>) -> Response {
    let Some(session_id) = params.get("session_id").and_then(|s| s.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    };
    let target_id = params.get("target_id").cloned().unwrap_or_default();
    json_passthrough(&state, session_id, &format!("/json/close/{target_id}")).await
}

async fn json_protocol(State(state): State<Arc<MuxState>>, Path(session_id): Path<Uuid>) -> Response {
    json_passthrough(&state, session_id, "/json/protocol").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_message_size_is_64mb() {
        let state = MuxState::default();
        assert_eq!(state.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn with_max_message_size_overrides_default() {
        let state = MuxState::new(Arc::new(WebhookManager::new())).with_max_message_size(1024);
        assert_eq!(state.max_message_size, 1024);
    }
}
