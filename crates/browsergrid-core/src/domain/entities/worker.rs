//! Worker entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A per-host agent registered against a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub hostname: String,
    pub max_slots: u32,
    pub active_sessions: u32,
    pub paused: bool,
    pub last_beat: DateTime<Utc>,
}

impl Worker {
    pub fn new(pool_id: Uuid, hostname: impl Into<String>, max_slots: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_id,
            hostname: hostname.into(),
            max_slots,
            active_sessions: 0,
            paused: false,
            last_beat: Utc::now(),
        }
    }

    /// A worker is online iff `now - last_beat <= 2 * heartbeat_interval`.
    #[must_use]
    pub fn is_online(&self, now: DateTime<Utc>, heartbeat_interval: chrono::Duration) -> bool {
        now - self.last_beat <= heartbeat_interval * 2
    }

    /// A worker is considered dead by the reconciler's sweep once
    /// `now - last_beat > 3 * heartbeat_interval` (spec.md §4.6 step 7).
    #[must_use]
    pub fn is_dead(&self, now: DateTime<Utc>, heartbeat_interval: chrono::Duration) -> bool {
        now - self.last_beat > heartbeat_interval * 3
    }

    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_beat = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn online_within_two_intervals() {
        let w = Worker::new(Uuid::new_v4(), "host-1", 4);
        let now = w.last_beat + Duration::seconds(59);
        assert!(w.is_online(now, Duration::seconds(30)));
    }

    #[test]
    fn offline_past_two_intervals() {
        let w = Worker::new(Uuid::new_v4(), "host-1", 4);
        let now = w.last_beat + Duration::seconds(61);
        assert!(!w.is_online(now, Duration::seconds(30)));
    }

    #[test]
    fn dead_past_three_intervals() {
        let w = Worker::new(Uuid::new_v4(), "host-1", 4);
        assert!(!w.is_dead(w.last_beat + Duration::seconds(89), Duration::seconds(30)));
        assert!(w.is_dead(w.last_beat + Duration::seconds(91), Duration::seconds(30)));
    }
}
