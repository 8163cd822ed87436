//! Pure transition function for the Session State Machine (spec.md §4.3).
//!
//! This module intentionally does no I/O: it folds one event into a
//! status, leaving persistence and event-logging to the caller (the
//! Task Scheduler handlers and the Metadata Store). Keeping it pure is
//! what lets §8's "fold" property be checked directly.

use super::event::SessionEventKind;
use super::status::SessionStatus;

/// Whether `cur -> next` is an admissible transition (spec.md §4.3):
///
/// - (a) `rank(next) > rank(cur)`, or
/// - (b) `cur` and `next` are `running <-> idle`,
///
/// provided `cur` is not terminal. The pooled-specific transitions named
/// in spec.md §4.3(c) (`available->claimed`, `claimed->running`,
/// `available->{terminated,expired}`) are all rank-increasing and are
/// therefore already admitted by (a); they are called out there to
/// document intent, not to add a separate gate.
#[must_use]
pub fn is_admissible(cur: SessionStatus, next: SessionStatus) -> bool {
    if cur.is_terminal() {
        return false;
    }
    if next.rank() > cur.rank() {
        return true;
    }
    matches!(
        (cur, next),
        (SessionStatus::Running, SessionStatus::Idle) | (SessionStatus::Idle, SessionStatus::Running)
    )
}

/// The outcome of folding one event into a session's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub next_status: SessionStatus,
    pub changed: bool,
}

/// Applies `event` to `cur`, returning the resulting status.
///
/// Events with no mapped target status, or whose mapped target is not an
/// admissible transition from `cur`, leave the status unchanged — the
/// event is still expected to be appended to the session's event log by
/// the caller (spec.md §4.3: "rejected silently — the event is still
/// logged").
#[must_use]
pub fn apply(cur: SessionStatus, event: SessionEventKind) -> TransitionOutcome {
    match event.target_status() {
        Some(target) if is_admissible(cur, target) => TransitionOutcome {
            next_status: target,
            changed: target != cur,
        },
        _ => TransitionOutcome {
            next_status: cur,
            changed: false,
        },
    }
}

/// Folds a sequence of events into a final status, starting from `init`.
/// Used by §8's "fold" testable property.
#[must_use]
pub fn fold(init: SessionStatus, events: impl IntoIterator<Item = SessionEventKind>) -> SessionStatus {
    events
        .into_iter()
        .fold(init, |cur, ev| apply(cur, ev).next_status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEventKind::*;
    use SessionStatus::*;

    #[test]
    fn pooled_cold_start_path() {
        let s = fold(Pending, [SessionStarting, ContainerStarted, BrowserStarted, SessionAvailable]);
        assert_eq!(s, Available);
    }

    #[test]
    fn direct_session_path_skips_available() {
        let s = fold(Pending, [SessionStarting, BrowserStarted, SessionReady]);
        assert_eq!(s, Running);
    }

    #[test]
    fn claim_then_run() {
        assert_eq!(fold(Available, [SessionClaimed, SessionAssigned]), Running);
    }

    #[test]
    fn running_idle_oscillates() {
        assert_eq!(apply(Running, SessionIdle).next_status, Idle);
        assert_eq!(apply(Idle, SessionActive).next_status, Running);
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [Completed, Failed, Expired, Crashed, TimedOut, Terminated] {
            let out = apply(terminal, SessionAvailable);
            assert!(!out.changed);
            assert_eq!(out.next_status, terminal);
        }
    }

    #[test]
    fn backwards_transition_rejected_silently() {
        // running -> pending is a rank decrease and not the idle<->running
        // exception, so it's rejected; status stays put.
        let out = apply(Running, SessionCreated);
        assert!(!out.changed);
        assert_eq!(out.next_status, Running);
    }

    #[test]
    fn failure_from_any_non_terminal_state() {
        for cur in [Pending, Starting, Available, Claimed, Running, Idle] {
            let out = apply(cur, StartupFailed);
            assert_eq!(out.next_status, Failed);
        }
    }

    #[test]
    fn available_direct_to_expired_is_admissible() {
        let out = apply(Available, SessionExpired);
        assert_eq!(out.next_status, Expired);
    }
}
