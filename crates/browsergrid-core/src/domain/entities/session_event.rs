//! Append-only session event log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::state_machine::SessionEventKind;

/// An immutable entry in a session's event log.
///
/// SessionEvents are strictly ordered per session by `timestamp`; ties
/// broken by insertion order (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: SessionEventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Monotonic insertion sequence, used to break timestamp ties.
    pub sequence: u64,
}

impl SessionEvent {
    pub fn new(session_id: Uuid, kind: SessionEventKind, data: serde_json::Value, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind,
            data,
            timestamp: Utc::now(),
            sequence,
        }
    }
}

/// A single CPU/memory/network sample for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub id: Uuid,
    pub session_id: Uuid,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl SessionMetrics {
    pub fn new(session_id: Uuid, cpu_percent: f64, memory_mb: f64, rx_bytes: u64, tx_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            cpu_percent,
            memory_mb,
            rx_bytes,
            tx_bytes,
            timestamp: Utc::now(),
        }
    }
}
