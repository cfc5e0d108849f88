//! Session Core Types
//!
//! Type definitions for the transfer-session protocol engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::leaf::{Asset, ClaimFormat, TransactionReceipt};
use crate::ontology::{AssetBinding, TransferStrategy};
use crate::session::state::SessionState;

/// Session ID type - ULID-based unique identifier
///
/// Monotonic, sortable, no coordination needed between gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(ulid::Ulid);

impl SessionId {
    /// Generate a new unique SessionId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Coarse session status exposed by the status/audit facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Done => "DONE",
            SessionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStatus {
    Completed,
    RolledBack,
    Aborted,
    InTransit,
}

impl SubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStatus::Completed => "COMPLETED",
            SubStatus::RolledBack => "ROLLED_BACK",
            SubStatus::Aborted => "ABORTED",
            SubStatus::InTransit => "IN_TRANSIT",
        }
    }
}

/// A transfer request as admitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Client-provided idempotency key: re-submitting a request with the
    /// same context id never causes a second asset movement.
    #[serde(default)]
    pub context_id: Option<String>,
    pub source_network: String,
    pub destination_network: String,
    pub asset: Asset,
    #[serde(default)]
    pub claim_format: ClaimFormat,
}

/// Durable record of one transfer session.
///
/// Mutated only by the session coordinator during stage transitions;
/// immutable once the state is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub context_id: Option<String>,
    pub source_network: String,
    pub destination_network: String,
    pub asset: Asset,
    pub claim_format: ClaimFormat,
    /// Movement strategy resolved from the ontology at admission; kept on
    /// the record so recovery does not depend on config reload ordering.
    pub strategy: TransferStrategy,
    pub source_binding: AssetBinding,
    pub destination_binding: AssetBinding,
    /// Identity of the counterparty gateway, known once stage 1 validated it.
    pub counterparty_id: Option<String>,
    pub state: SessionState,
    pub lock_proof: Option<TransactionReceipt>,
    pub commitment: Option<TransactionReceipt>,
    pub error: Option<String>,
    pub retry_count: i32,
    /// Set when crash recovery cannot resolve this session automatically;
    /// flagged sessions are excluded from auto-resume.
    pub recovery_flagged: bool,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub updated_at_ms: i64,
}

impl SessionRecord {
    pub fn new(
        session_id: SessionId,
        request: &TransferRequest,
        strategy: TransferStrategy,
        source_binding: AssetBinding,
        destination_binding: AssetBinding,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            session_id,
            context_id: request.context_id.clone(),
            source_network: request.source_network.clone(),
            destination_network: request.destination_network.clone(),
            asset: request.asset.clone(),
            claim_format: request.claim_format,
            strategy,
            source_binding,
            destination_binding,
            counterparty_id: None,
            state: SessionState::Proposing,
            lock_proof: None,
            commitment: None,
            error: None,
            retry_count: 0,
            recovery_flagged: false,
            started_at_ms: now,
            ended_at_ms: None,
            updated_at_ms: now,
        }
    }

    /// Protocol stage this session is (or failed) at. A session that failed
    /// after producing lock evidence reports stage 2; pure proposal-time
    /// failures report stage 1.
    pub fn stage(&self) -> u8 {
        match self.state {
            SessionState::Failed if self.lock_proof.is_some() => 2,
            state => state.stage(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn substatus(&self) -> SubStatus {
        self.state.substatus()
    }
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session[{}] {} -> {} asset={} state={}",
            self.session_id,
            self.source_network,
            self.destination_network,
            self.asset.asset_id,
            self.state
        )
    }
}
