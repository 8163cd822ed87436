//! Per-session multiplexer state (spec.md §4.7): the command/response
//! correlation table, the client registry, and each client's bounded
//! outbound queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

/// The three CDP message shapes (spec.md §4.7 "Message taxonomy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `id != 0 && method != ""`
    Command,
    /// `id == 0 && method != ""`
    Event,
    /// `id != 0 && method == ""`
    Response,
}

/// Classifies a decoded CDP message by its `id`/`method` fields. Messages
/// matching none of the three shapes (e.g. missing both) are treated as
/// malformed by the caller.
#[must_use]
pub fn classify(id: Option<i64>, method: Option<&str>) -> Option<MessageKind> {
    let has_method = method.is_some_and(|m| !m.is_empty());
    match (id, has_method) {
        (Some(id), true) if id != 0 => Some(MessageKind::Command),
        (None | Some(0), true) => Some(MessageKind::Event),
        (Some(id), false) if id != 0 => Some(MessageKind::Response),
        _ => None,
    }
}

const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// A per-client outbound mailbox. Overflow drops the oldest queued
/// message rather than blocking the upstream reader or rejecting the
/// newest event (spec.md §4.7 "drop-oldest policy on overflow with a
/// logged warning").
pub struct OutboundQueue {
    client_id: Uuid,
    capacity: usize,
    inner: Mutex<VecDeque<Value>>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(client_id: Uuid) -> Self {
        Self::with_capacity(client_id, DEFAULT_OUTBOUND_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(client_id: Uuid, capacity: usize) -> Self {
        Self {
            client_id,
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn push(&self, message: Value) {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            tracing::warn!(client_id = %self.client_id, "outbound queue full, dropped oldest message");
        }
        queue.push_back(message);
        self.notify.notify_one();
    }

    /// Marks the queue closed: once drained, `pop()` returns `None`
    /// instead of waiting forever, so the client's writer task can send a
    /// close frame and exit (spec.md §4.7 "Upstream disconnect closes all
    /// client sockets with a normal close code").
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Waits for and pops the next queued message. Returns `None` once
    /// `close()` has been called and the queue has drained.
    pub async fn pop(&self) -> Option<Value> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Maps a mux-generated upstream command id back to the client that
/// issued it and that client's own original id, so the response can be
/// routed to exactly one client with its id restored (spec.md §4.7
/// "Correlation").
#[derive(Default)]
pub struct CorrelationTable {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, (Uuid, Value)>>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh upstream id for `client_id`'s command, recording
    /// the client's original id so the response can restore it.
    pub async fn register(&self, client_id: Uuid, original_id: Value) -> i64 {
        let upstream_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.insert(upstream_id, (client_id, original_id));
        upstream_id
    }

    /// Resolves an upstream response id back to `(client_id, original_id)`,
    /// removing the entry (each command is answered exactly once).
    pub async fn resolve(&self, upstream_id: i64) -> Option<(Uuid, Value)> {
        self.pending.lock().await.remove(&upstream_id)
    }
}

/// Owns one session's client registry and correlation table. The
/// upstream socket itself is driven by `proxy.rs`, which holds a
/// `SessionMux` alongside its reader/writer tasks.
pub struct SessionMux {
    pub session_id: Uuid,
    correlation: CorrelationTable,
    clients: RwLock<HashMap<Uuid, Arc<OutboundQueue>>>,
}

impl SessionMux {
    #[must_use]
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            correlation: CorrelationTable::new(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_client(&self) -> (Uuid, Arc<OutboundQueue>) {
        let client_id = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new(client_id));
        self.clients.write().await.insert(client_id, Arc::clone(&queue));
        tracing::info!(session_id = %self.session_id, client_id = %client_id, "client attached");
        (client_id, queue)
    }

    pub async fn deregister_client(&self, client_id: Uuid) {
        self.clients.write().await.remove(&client_id);
        tracing::info!(session_id = %self.session_id, client_id = %client_id, "client detached");
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Allocates an upstream id for a client command and remembers how to
    /// route the eventual response.
    pub async fn tag_command(&self, client_id: Uuid, original_id: Value) -> i64 {
        self.correlation.register(client_id, original_id).await
    }

    /// Routes an upstream response to the one client that issued it,
    /// restoring its original id. Returns `false` if the upstream id is
    /// unknown (already resolved, or never registered).
    pub async fn route_response(&self, upstream_id: i64, mut body: Value) -> bool {
        let Some((client_id, original_id)) = self.correlation.resolve(upstream_id).await else {
            tracing::warn!(session_id = %self.session_id, upstream_id, "response for unknown upstream id");
            return false;
        };
        if let Value::Object(obj) = &mut body {
            obj.insert("id".to_string(), original_id);
        }
        let clients = self.clients.read().await;
        if let Some(queue) = clients.get(&client_id) {
            queue.push(body).await;
            true
        } else {
            false
        }
    }

    /// Broadcasts an upstream event to every attached client (spec.md
    /// §4.7: "at-most-one copy per attached client, no cross-client
    /// ordering guarantee").
    pub async fn broadcast(&self, body: Value) {
        let clients = self.clients.read().await;
        for queue in clients.values() {
            queue.push(body.clone()).await;
        }
    }

    /// Closes every attached client's outbound queue, so each client's
    /// writer task sends a normal-close frame and exits (spec.md §4.7
    /// "Upstream disconnect closes all client sockets with a normal close
    /// code"). Does not deregister clients; each client's own read loop
    /// deregisters itself once its socket actually closes.
    pub async fn close_all(&self) {
        let clients = self.clients.read().await;
        for queue in clients.values() {
            queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_command_event_response() {
        assert_eq!(classify(Some(1), Some("Page.enable")), Some(MessageKind::Command));
        assert_eq!(classify(None, Some("Page.loadEventFired")), Some(MessageKind::Event));
        assert_eq!(classify(Some(0), Some("Page.loadEventFired")), Some(MessageKind::Event));
        assert_eq!(classify(Some(1), None), Some(MessageKind::Response));
        assert_eq!(classify(Some(1), Some("")), Some(MessageKind::Response));
    }

    #[test]
    fn malformed_messages_classify_to_none() {
        assert_eq!(classify(None, None), None);
        assert_eq!(classify(Some(0), None), None);
    }

    #[tokio::test]
    async fn outbound_queue_drops_oldest_on_overflow() {
        let queue = OutboundQueue::with_capacity(Uuid::new_v4(), 2);
        queue.push(serde_json::json!({"n": 1})).await;
        queue.push(serde_json::json!({"n": 2})).await;
        queue.push(serde_json::json!({"n": 3})).await;

        assert_eq!(queue.pop().await, Some(serde_json::json!({"n": 2})));
        assert_eq!(queue.pop().await, Some(serde_json::json!({"n": 3})));
    }

    #[tokio::test]
    async fn correlation_table_round_trips_original_id() {
        let table = CorrelationTable::new();
        let client_id = Uuid::new_v4();
        let upstream_id = table.register(client_id, serde_json::json!(42)).await;

        let (resolved_client, original_id) = table.resolve(upstream_id).await.unwrap();
        assert_eq!(resolved_client, client_id);
        assert_eq!(original_id, serde_json::json!(42));
        assert!(table.resolve(upstream_id).await.is_none());
    }

    #[tokio::test]
    async fn route_response_restores_original_id_and_reaches_one_client() {
        let mux = SessionMux::new(Uuid::new_v4());
        let (client_a, queue_a) = mux.register_client().await;
        let (_client_b, queue_b) = mux.register_client().await;

        let upstream_id = mux.tag_command(client_a, serde_json::json!(7)).await;
        let delivered = mux
            .route_response(upstream_id, serde_json::json!({"id": upstream_id, "result": {}}))
            .await;
        assert!(delivered);

        let msg = queue_a.pop().await.unwrap();
        assert_eq!(msg["id"], serde_json::json!(7));
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), queue_b.pop()).await.is_err());
    }

    #[tokio::test]
    async fn closed_queue_drains_then_returns_none() {
        let queue = OutboundQueue::new(Uuid::new_v4());
        queue.push(serde_json::json!({"n": 1})).await;
        queue.close();

        assert_eq!(queue.pop().await, Some(serde_json::json!({"n": 1})));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn close_all_closes_every_attached_clients_queue() {
        let mux = SessionMux::new(Uuid::new_v4());
        let (_a, queue_a) = mux.register_client().await;
        let (_b, queue_b) = mux.register_client().await;

        mux.close_all().await;

        assert_eq!(queue_a.pop().await, None);
        assert_eq!(queue_b.pop().await, None);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_attached_clients() {
        let mux = SessionMux::new(Uuid::new_v4());
        let (_a, queue_a) = mux.register_client().await;
        let (_b, queue_b) = mux.register_client().await;

        mux.broadcast(serde_json::json!({"method": "Page.loadEventFired"})).await;

        assert!(queue_a.pop().await.is_some());
        assert!(queue_b.pop().await.is_some());
    }
}
