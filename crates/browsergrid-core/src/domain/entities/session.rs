//! Session entity — the unit of browser work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::state_machine::SessionStatus;

/// Browser kind requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Edge,
    Webkit,
}

/// Screen/viewport configuration.
///
/// `scale` is a float (spec.md §9a resolves the ambiguity between the
/// two `ScreenConfig` scale defaults found in the source: `1` vs `1.0`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub scale: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            dpi: 96,
            scale: 1.0,
        }
    }
}

/// Upstream proxy configuration for a session's browser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resource limits applied to the provisioned browser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: f64,
    pub memory_mb: u32,
    pub timeout_seconds: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_mb: 1024,
            timeout_seconds: 3600,
        }
    }
}

/// The unit of browser work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub browser: BrowserKind,
    pub browser_version: Option<String>,
    pub os: String,
    pub headless: bool,
    pub screen: ScreenConfig,
    pub proxy: Option<ProxyConfig>,
    pub resources: ResourceLimits,
    pub environment: HashMap<String, String>,
    pub status: SessionStatus,
    pub provider: String,
    pub work_pool_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    pub ws_endpoint: Option<String>,
    pub live_url: Option<String>,
    pub is_pooled: bool,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a new, freshly-pending session.
    pub fn new(provider: impl Into<String>, is_pooled: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            browser: BrowserKind::Chrome,
            browser_version: None,
            os: "linux".to_string(),
            headless: true,
            screen: ScreenConfig::default(),
            proxy: None,
            resources: ResourceLimits::default(),
            environment: HashMap::new(),
            status: SessionStatus::Pending,
            provider: provider.into(),
            work_pool_id: None,
            worker_id: None,
            ws_endpoint: None,
            live_url: None,
            is_pooled,
            claimed_by: None,
            claimed_at: None,
            available_at: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Cross-entity invariant: an `available`, pooled session must have no
    /// claim fields set (spec.md §3).
    #[must_use]
    pub fn available_invariant_holds(&self) -> bool {
        if self.status == SessionStatus::Available && self.is_pooled {
            self.claimed_by.is_none() && self.claimed_at.is_none()
        } else {
            true
        }
    }

    /// Cross-entity invariant: a `claimed` session has both claim fields set.
    #[must_use]
    pub fn claimed_invariant_holds(&self) -> bool {
        if self.status == SessionStatus::Claimed {
            self.claimed_by.is_some() && self.claimed_at.is_some()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_pending_and_unclaimed() {
        let s = Session::new("container", true);
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(s.claimed_by.is_none());
        assert!(s.available_invariant_holds());
        assert!(s.claimed_invariant_holds());
    }

    #[test]
    fn screen_config_scale_defaults_to_one_point_zero() {
        assert_eq!(ScreenConfig::default().scale, 1.0_f64);
    }
}
