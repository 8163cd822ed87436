//! Session status and its transition rank (spec.md §4.3).

use serde::{Deserialize, Serialize};

/// The canonical session status. Terminal statuses never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Starting,
    Available,
    Claimed,
    Running,
    Idle,
    Completed,
    Failed,
    Expired,
    Crashed,
    TimedOut,
    Terminated,
}

impl SessionStatus {
    /// Monotonic rank used by the admissibility rule: `pending(0) <
    /// starting(1) < available(2) < claimed(3) < running|idle(4) <
    /// terminal(5)`.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Starting => 1,
            Self::Available => 2,
            Self::Claimed => 3,
            Self::Running | Self::Idle => 4,
            Self::Completed
            | Self::Failed
            | Self::Expired
            | Self::Crashed
            | Self::TimedOut
            | Self::Terminated => 5,
        }
    }

    /// Terminal statuses never transition further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.rank() == 5
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Available => "available",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Crashed => "crashed",
            Self::TimedOut => "timed_out",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_rank_five() {
        for s in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Expired,
            SessionStatus::Crashed,
            SessionStatus::TimedOut,
            SessionStatus::Terminated,
        ] {
            assert!(s.is_terminal());
            assert_eq!(s.rank(), 5);
        }
    }

    #[test]
    fn running_and_idle_share_rank() {
        assert_eq!(SessionStatus::Running.rank(), SessionStatus::Idle.rank());
    }
}
