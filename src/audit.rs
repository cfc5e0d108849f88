//! Audit/Status Facade
//!
//! Read-only queries over persisted sessions and log entries, for
//! operational status and compliance export. Never mutates anything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::session::types::{SessionId, SessionStatus, SubStatus};
use crate::storage::{LogEntry, LogStore, SessionStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub substatus: SubStatus,
    pub stage: u8,
    pub start_time_ms: i64,
    pub recovery_flagged: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditResponse {
    pub sessions: Vec<serde_json::Value>,
    pub log_entries: Vec<LogEntry>,
}

pub struct StatusFacade {
    sessions: Arc<dyn SessionStore>,
    logs: Arc<dyn LogStore>,
}

impl StatusFacade {
    pub fn new(sessions: Arc<dyn SessionStore>, logs: Arc<dyn LogStore>) -> Self {
        Self { sessions, logs }
    }

    pub async fn get_status(&self, session_id: SessionId) -> Result<StatusResponse, GatewayError> {
        let record = self
            .sessions
            .get(&session_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        Ok(StatusResponse {
            session_id,
            status: record.status(),
            substatus: record.substatus(),
            stage: record.stage(),
            start_time_ms: record.started_at_ms,
            recovery_flagged: record.recovery_flagged,
        })
    }

    /// Export every session started inside the window, serialized in full,
    /// together with the log entries of the same window.
    pub async fn perform_audit(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<AuditResponse, GatewayError> {
        if from_ms > to_ms {
            return Err(GatewayError::InvalidRequest(
                "audit window start is after its end".to_string(),
            ));
        }

        let records = self.sessions.find_in_range(from_ms, to_ms).await?;
        let sessions = records
            .iter()
            .map(|r| serde_json::to_value(r).map_err(|e| GatewayError::Internal(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let log_entries = self.logs.entries_in_range(from_ms, to_ms).await?;

        Ok(AuditResponse {
            sessions,
            log_entries,
        })
    }
}
