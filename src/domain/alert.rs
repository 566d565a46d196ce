use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported status of a check key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Ok,
    /// Confirmed down
    Inactive,
    /// Confirmed up but impaired
    Degraded,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Ok => "ok",
            AlertStatus::Inactive => "inactive",
            AlertStatus::Degraded => "degraded",
        }
    }

    pub fn is_alerting(&self) -> bool {
        !matches!(self, AlertStatus::Ok)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted hysteresis state for one check key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub success_count: u32,
    /// Set on cooldown keys only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Which threshold pair governs a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    External,
}

/// Consecutive-result thresholds for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub fails_for_alert: u32,
    pub successes_to_clear: u32,
}

impl Thresholds {
    pub fn new(fails_for_alert: u32, successes_to_clear: u32) -> Self {
        Self {
            fails_for_alert: fails_for_alert.max(1),
            successes_to_clear: successes_to_clear.max(1),
        }
    }
}

/// Status change produced by a hysteresis evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AlertStatus,
    pub to: AlertStatus,
}

/// Result of feeding one observation into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Effective status after this observation
    pub status: AlertStatus,
    /// Set only when the effective status changed
    pub transition: Option<Transition>,
}
