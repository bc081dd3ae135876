//! Policies, decisions, and how a decision maps to an admission outcome.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-window quota: at most `max` requests per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Policy {
    max: u64,
    window_seconds: u64,
}

impl Policy {
    /// Create a policy. Both values must be at least 1.
    pub fn new(max: u64, window_seconds: u64) -> Option<Self> {
        if max == 0 || window_seconds == 0 {
            return None;
        }
        Some(Self {
            max,
            window_seconds,
        })
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Whether a window that already counted `current` requests must turn
    /// the next one away. The `max`-th request of a window is admitted.
    pub fn is_exhausted(&self, current: i64) -> bool {
        current.saturating_add(1) > i64::try_from(self.max).unwrap_or(i64::MAX)
    }
}

/// Result of one rate-limit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// What the front end does when the store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request.
    Open,
    /// Reject the request.
    #[default]
    Closed,
}

/// The outcome handed back to the request-handling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Admission {
    Allowed,
    Throttled,
    /// The store was unreachable or rejected the handshake; `admitted`
    /// follows the configured [`FailureMode`].
    Unavailable { admitted: bool },
}

impl Admission {
    pub fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Allow => Admission::Allowed,
            Decision::Deny => Admission::Throttled,
        }
    }

    pub fn unavailable(mode: FailureMode) -> Self {
        Admission::Unavailable {
            admitted: mode == FailureMode::Open,
        }
    }

    pub fn is_admitted(&self) -> bool {
        match self {
            Admission::Allowed => true,
            Admission::Throttled => false,
            Admission::Unavailable { admitted } => *admitted,
        }
    }

    /// HTTP status a front end would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Admission::Allowed | Admission::Unavailable { admitted: true } => 200,
            Admission::Throttled => 429,
            Admission::Unavailable { admitted: false } => 503,
        }
    }
}
