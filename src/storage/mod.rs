//! Persistence Layer
//!
//! Two logical stores back the protocol engine:
//! - *Local*: this gateway's private crash log, the source of truth when
//!   resuming after a crash.
//! - *Remote*: state shared with the direct counterparty gateway, used to
//!   cross-check stage evidence.
//!
//! Both are written at every stage transition and every oracle log event.
//! The same traits serve both scopes; deployments pick Postgres or in-memory
//! implementations per scope.

pub mod log_writer;
pub mod memory;
pub mod postgres;

pub use log_writer::LogWriter;
pub use memory::{MemoryLogStore, MemorySessionStore};
pub use postgres::{PgLogStore, PgSessionStore};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::leaf::TransactionReceipt;
use crate::session::state::SessionState;
use crate::session::types::{SessionId, SessionRecord};

/// Operation phase of a log entry. Within one operation the order is always
/// INIT < EXEC < (DONE | FAIL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogPhase {
    Init,
    Exec,
    Done,
    Fail,
}

impl LogPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogPhase::Init => "INIT",
            LogPhase::Exec => "EXEC",
            LogPhase::Done => "DONE",
            LogPhase::Fail => "FAIL",
        }
    }

    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s {
            "INIT" => Some(LogPhase::Init),
            "EXEC" => Some(LogPhase::Exec),
            "DONE" => Some(LogPhase::Done),
            "FAIL" => Some(LogPhase::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for LogPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit trail entry. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Store-assigned id (auto-increment); None before append.
    pub id: Option<i64>,
    /// Session id or oracle task id this entry belongs to.
    pub context_id: String,
    pub operation_id: Option<String>,
    /// Type tag, e.g. `oracle-read`, `oracle-update`, `transfer-stage2`.
    pub entry_type: String,
    pub phase: LogPhase,
    pub timestamp_ms: i64,
    pub metadata: serde_json::Value,
}

impl LogEntry {
    pub fn new(context_id: impl Into<String>, entry_type: impl Into<String>, phase: LogPhase) -> Self {
        Self {
            id: None,
            context_id: context_id.into(),
            operation_id: None,
            entry_type: entry_type.into(),
            phase,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Durable session records keyed by session id.
///
/// All state updates use atomic CAS so that concurrent workers never clobber
/// each other's transitions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert the record, or fully replace an existing row with the same
    /// session id (used to mirror the Local record into the Remote scope).
    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError>;

    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, GatewayError>;

    async fn get_by_context(
        &self,
        context_id: &str,
    ) -> Result<Option<SessionRecord>, GatewayError>;

    /// Atomic CAS: update state only if the current state matches.
    /// Returns false when another worker already transitioned the session.
    async fn update_state_if(
        &self,
        id: &SessionId,
        expected: SessionState,
        new: SessionState,
    ) -> Result<bool, GatewayError>;

    /// CAS with a recorded error message.
    async fn update_state_with_error(
        &self,
        id: &SessionId,
        expected: SessionState,
        new: SessionState,
        error: &str,
    ) -> Result<bool, GatewayError>;

    async fn record_proof(
        &self,
        id: &SessionId,
        proof: &TransactionReceipt,
    ) -> Result<(), GatewayError>;

    async fn record_commitment(
        &self,
        id: &SessionId,
        commitment: &TransactionReceipt,
    ) -> Result<(), GatewayError>;

    async fn set_recovery_flag(&self, id: &SessionId, flagged: bool) -> Result<(), GatewayError>;

    async fn increment_retry(&self, id: &SessionId) -> Result<(), GatewayError>;

    /// All sessions not in a terminal state (startup crash scan).
    async fn find_non_terminal(&self) -> Result<Vec<SessionRecord>, GatewayError>;

    /// Non-terminal sessions untouched for longer than the threshold.
    async fn find_stale(&self, threshold: Duration) -> Result<Vec<SessionRecord>, GatewayError>;

    /// Sessions started inside the given window (audit export).
    async fn find_in_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<SessionRecord>, GatewayError>;
}

/// Append-only log entries.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> Result<(), GatewayError>;

    async fn entries_for(&self, context_id: &str) -> Result<Vec<LogEntry>, GatewayError>;

    async fn entries_in_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<LogEntry>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_roundtrip() {
        for phase in [LogPhase::Init, LogPhase::Exec, LogPhase::Done, LogPhase::Fail] {
            assert_eq!(LogPhase::from_str_tag(phase.as_str()), Some(phase));
        }
        assert_eq!(LogPhase::from_str_tag("NOPE"), None);
    }

    #[test]
    fn test_log_entry_builders() {
        let entry = LogEntry::new("task-1", "oracle-read", LogPhase::Init)
            .with_operation("op-1")
            .with_metadata(serde_json::json!({"contract": "0xc"}));
        assert_eq!(entry.context_id, "task-1");
        assert_eq!(entry.operation_id.as_deref(), Some("op-1"));
        assert_eq!(entry.phase, LogPhase::Init);
        assert!(entry.id.is_none());
    }
}
