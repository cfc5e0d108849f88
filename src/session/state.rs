//! Session FSM State Definitions
//!
//! State IDs are designed for storage as SMALLINT. Terminal states:
//! COMMITTED (40), FAILED (-10), ROLLED_BACK (-30).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::types::{SessionStatus, SubStatus};

/// Transfer session FSM states.
///
/// The protocol stage (1|2|3) and the coarse status reported to callers are
/// projections of this single state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SessionState {
    /// Stage 1 recorded, proposal exchange with the counterparty in flight
    Proposing = 10,

    /// Stage 1 complete - counterparty accepted the proposal
    Proposed = 15,

    /// Stage 2 recorded before the source leaf call (persist-before-call)
    LockPending = 20,

    /// Stage 2 complete - lock proof persisted and verified by counterparty.
    /// CRITICAL: the asset is escrowed; must reach COMMITTED or ROLLED_BACK
    Locked = 25,

    /// Stage 3 recorded before the counterparty commitment call
    CommitPending = 30,

    /// Terminal: transfer completed, destination holds the asset
    Committed = 40,

    /// Terminal: failed before any asset movement
    Failed = -10,

    /// Rollback in progress (releasing the source escrow)
    RollingBack = -20,

    /// Terminal: source escrow released after a failed transfer
    RolledBack = -30,
}

impl SessionState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::Failed | SessionState::RolledBack
        )
    }

    /// Check if the asset is escrowed but not yet committed or released
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SessionState::Locked | SessionState::CommitPending | SessionState::RollingBack
        )
    }

    /// Get the numeric state ID for storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a stored state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(SessionState::Proposing),
            15 => Some(SessionState::Proposed),
            20 => Some(SessionState::LockPending),
            25 => Some(SessionState::Locked),
            30 => Some(SessionState::CommitPending),
            40 => Some(SessionState::Committed),
            -10 => Some(SessionState::Failed),
            -20 => Some(SessionState::RollingBack),
            -30 => Some(SessionState::RolledBack),
            _ => None,
        }
    }

    /// Protocol stage this state belongs to.
    ///
    /// Rollback states keep stage 2: that is where the escrow lives.
    pub fn stage(&self) -> u8 {
        match self {
            SessionState::Proposing | SessionState::Proposed | SessionState::Failed => 1,
            SessionState::LockPending
            | SessionState::Locked
            | SessionState::RollingBack
            | SessionState::RolledBack => 2,
            SessionState::CommitPending | SessionState::Committed => 3,
        }
    }

    /// Coarse status reported by the status/audit facade.
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Proposing => SessionStatus::Pending,
            SessionState::Proposed
            | SessionState::LockPending
            | SessionState::Locked
            | SessionState::CommitPending
            | SessionState::RollingBack => SessionStatus::InProgress,
            SessionState::Committed => SessionStatus::Done,
            SessionState::Failed | SessionState::RolledBack => SessionStatus::Failed,
        }
    }

    pub fn substatus(&self) -> SubStatus {
        match self {
            SessionState::Committed => SubStatus::Completed,
            SessionState::RolledBack => SubStatus::RolledBack,
            SessionState::Failed => SubStatus::Aborted,
            _ => SubStatus::InTransit,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Proposing => "PROPOSING",
            SessionState::Proposed => "PROPOSED",
            SessionState::LockPending => "LOCK_PENDING",
            SessionState::Locked => "LOCKED",
            SessionState::CommitPending => "COMMIT_PENDING",
            SessionState::Committed => "COMMITTED",
            SessionState::Failed => "FAILED",
            SessionState::RollingBack => "ROLLING_BACK",
            SessionState::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SessionState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SessionState::from_id(value).ok_or(())
    }
}
