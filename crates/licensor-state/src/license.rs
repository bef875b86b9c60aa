//! # License Status Lifecycle
//!
//! Tracks the status of an issued license and the history of changes to it.
//!
//! ## States
//!
//! ```text
//!             ┌──── validation (date window, signature) ────┐
//!             ▼                                              │
//! Active ◀──▶ Suspended        Expired        Invalid ───────┘
//!    │            │               │              │
//!    └────────────┴─── revoke ────┴──────────────┴──▶ Revoked (terminal)
//! ```
//!
//! Two kinds of change exist:
//!
//! - **Observed**: the validation pipeline reports what the license is as of
//!   today (`Active`, `Suspended` before the window, `Expired` after it,
//!   `Invalid` on a bad signature). Observations never leave `Revoked`, and
//!   never lift a manual hold.
//! - **Manual**: `suspend` places a hold, `reinstate` lifts it, `revoke` ends
//!   the lifecycle.

use chrono::NaiveDate;
use licensor_core::{StateError, Timestamp};
use serde::{Deserialize, Serialize};

/// Status of an issued license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    /// Valid and within its window.
    Active,
    /// Past its `valid_to` date.
    Expired,
    /// Before its `valid_from` date, or manually held.
    Suspended,
    /// Permanently withdrawn (terminal).
    Revoked,
    /// Signature or content check failed.
    Invalid,
}

impl LicenseStatus {
    /// Status implied by the validity window as of `today`.
    ///
    /// Both ends of the window are inclusive.
    pub fn from_window(today: NaiveDate, valid_from: NaiveDate, valid_to: NaiveDate) -> Self {
        if today < valid_from {
            Self::Suspended
        } else if today > valid_to {
            Self::Expired
        } else {
            Self::Active
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked)
    }

    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Suspended => "SUSPENDED",
            Self::Revoked => "REVOKED",
            Self::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransitionRecord {
    /// Status before the change.
    pub from_state: LicenseStatus,
    /// Status after the change.
    pub to_state: LicenseStatus,
    /// When the change happened.
    pub timestamp: Timestamp,
    /// Why.
    pub reason: String,
}

/// Current status of a license plus its change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLifecycle {
    status: LicenseStatus,
    #[serde(default)]
    held: bool,
    #[serde(default)]
    transitions: Vec<StatusTransitionRecord>,
}

impl LicenseLifecycle {
    /// Start in `initial`.
    pub fn new(initial: LicenseStatus) -> Self {
        Self {
            status: initial,
            held: false,
            transitions: Vec::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> LicenseStatus {
        self.status
    }

    /// Whether a manual suspension is in force.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Ordered change log.
    pub fn transitions(&self) -> &[StatusTransitionRecord] {
        &self.transitions
    }

    /// Apply a status observed by validation. Returns whether it changed.
    pub fn observe(&mut self, observed: LicenseStatus, at: Timestamp, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let target = if self.held && observed == LicenseStatus::Active {
            LicenseStatus::Suspended
        } else {
            observed
        };
        if target == self.status {
            return false;
        }
        self.do_transition(target, at, reason);
        true
    }

    /// Manually suspend (ACTIVE → SUSPENDED).
    pub fn suspend(&mut self, at: Timestamp, reason: &str) -> Result<(), StateError> {
        self.require_state(LicenseStatus::Active, LicenseStatus::Suspended)?;
        self.held = true;
        self.do_transition(LicenseStatus::Suspended, at, reason);
        Ok(())
    }

    /// Lift a manual suspension (SUSPENDED → ACTIVE).
    ///
    /// The next validation re-derives the status from the window.
    pub fn reinstate(&mut self, at: Timestamp, reason: &str) -> Result<(), StateError> {
        self.require_state(LicenseStatus::Suspended, LicenseStatus::Active)?;
        if !self.held {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: LicenseStatus::Active.to_string(),
                reason: "license is not manually suspended".to_string(),
            });
        }
        self.held = false;
        self.do_transition(LicenseStatus::Active, at, reason);
        Ok(())
    }

    /// Revoke permanently. Allowed from every non-terminal state.
    pub fn revoke(&mut self, at: Timestamp, reason: &str) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal {
                record: "license".to_string(),
                state: self.status.to_string(),
            });
        }
        self.held = false;
        self.do_transition(LicenseStatus::Revoked, at, reason);
        Ok(())
    }

    fn require_state(&self, expected: LicenseStatus, target: LicenseStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal {
                record: "license".to_string(),
                state: self.status.to_string(),
            });
        }
        if self.status != expected {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!("requires {expected}"),
            });
        }
        Ok(())
    }

    fn do_transition(&mut self, to: LicenseStatus, at: Timestamp, reason: &str) {
        self.transitions.push(StatusTransitionRecord {
            from_state: self.status,
            to_state: to,
            timestamp: at,
            reason: reason.to_string(),
        });
        self.status = to;
    }
}
