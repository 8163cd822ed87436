//! Lifecycle events and the event -> next-status mapping (spec.md §4.3).

use serde::{Deserialize, Serialize};

use super::status::SessionStatus;

/// A lifecycle event appended to a session's event log. Events not listed
/// in the mapping table below produce no status change (they're still
/// logged for observability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    SessionCreated,
    ResourceAllocated,
    SessionStarting,
    ContainerStarted,
    BrowserStarted,
    SessionAvailable,
    PoolAdded,
    SessionClaimed,
    SessionAssigned,
    SessionReady,
    SessionActive,
    SessionIdle,
    SessionCompleted,
    SessionExpired,
    SessionTimedOut,
    SessionTerminated,
    StartupFailed,
    ResourceExhausted,
    NetworkError,
    BrowserCrashed,
    ContainerCrashed,
}

impl SessionEventKind {
    /// The status this event maps to, per spec.md §4.3's table. Returns
    /// `None` for events that don't change status on their own (none
    /// currently; every event kind here has a target, but the table is
    /// still expressed as a function in case future event kinds are
    /// purely informational).
    #[must_use]
    pub const fn target_status(self) -> Option<SessionStatus> {
        use SessionEventKind::*;
        use SessionStatus as S;
        Some(match self {
            SessionCreated | ResourceAllocated => S::Pending,
            SessionStarting | ContainerStarted | BrowserStarted => S::Starting,
            SessionAvailable | PoolAdded => S::Available,
            SessionClaimed => S::Claimed,
            SessionAssigned | SessionReady | SessionActive => S::Running,
            SessionIdle => S::Idle,
            SessionCompleted => S::Completed,
            SessionExpired => S::Expired,
            SessionTimedOut => S::TimedOut,
            SessionTerminated => S::Terminated,
            StartupFailed | ResourceExhausted | NetworkError => S::Failed,
            BrowserCrashed | ContainerCrashed => S::Crashed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_maps_to_a_status() {
        use SessionEventKind::*;
        for e in [
            SessionCreated,
            ResourceAllocated,
            SessionStarting,
            ContainerStarted,
            BrowserStarted,
            SessionAvailable,
            PoolAdded,
            SessionClaimed,
            SessionAssigned,
            SessionReady,
            SessionActive,
            SessionIdle,
            SessionCompleted,
            SessionExpired,
            SessionTimedOut,
            SessionTerminated,
            StartupFailed,
            ResourceExhausted,
            NetworkError,
            BrowserCrashed,
            ContainerCrashed,
        ] {
            assert!(e.target_status().is_some());
        }
    }

    #[test]
    fn failure_events_map_to_failed() {
        assert_eq!(
            SessionEventKind::StartupFailed.target_status(),
            Some(SessionStatus::Failed)
        );
        assert_eq!(
            SessionEventKind::NetworkError.target_status(),
            Some(SessionStatus::Failed)
        );
    }

    #[test]
    fn crash_events_map_to_crashed() {
        assert_eq!(
            SessionEventKind::BrowserCrashed.target_status(),
            Some(SessionStatus::Crashed)
        );
    }
}
