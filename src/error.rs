//! Gateway Error Taxonomy
//!
//! One taxonomy for the whole gateway. Ledger and oracle-operation failures
//! are contained at the operation level and reported through status fields;
//! configuration and protocol failures abort the request or session outright.

use thiserror::Error;

use crate::leaf::LedgerError;

/// Gateway-wide error type.
///
/// Error codes match the wire format used in API responses.
#[derive(Error, Debug)]
pub enum GatewayError {
    // === Admission Errors ===
    /// Missing approve address, missing ontology mapping, unsupported claim
    /// format. Surfaced immediately to the caller; no session is created.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Protocol Errors ===
    /// A leaf call failed (reverted transaction, RPC error). Localized to
    /// the current stage or oracle operation.
    #[error("Ledger invocation failed: {0}")]
    LedgerInvocation(#[from] LedgerError),

    /// Counterparty sent an out-of-sequence or version-incompatible message.
    /// The session aborts immediately; never silently ignored.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A persisted session's resolution cannot be determined automatically
    /// after restart; flagged for manual intervention rather than guessed.
    #[error("Crash recovery unresolved: {0}")]
    CrashRecovery(String),

    #[error("Stage {stage} timed out after {timeout_secs}s")]
    StageTimeout { stage: u8, timeout_secs: u64 },

    // === Lookup Errors ===
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Oracle task not found: {0}")]
    TaskNotFound(String),

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Counterparty unreachable: {0}")]
    CounterpartyUnreachable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::LedgerInvocation(_) => "LEDGER_INVOCATION_ERROR",
            GatewayError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            GatewayError::CrashRecovery(_) => "CRASH_RECOVERY_ERROR",
            GatewayError::StageTimeout { .. } => "STAGE_TIMEOUT",
            GatewayError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GatewayError::TaskNotFound(_) => "TASK_NOT_FOUND",
            GatewayError::Storage(_) => "STORAGE_ERROR",
            GatewayError::CounterpartyUnreachable(_) => "COUNTERPARTY_UNREACHABLE",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion for the API dispatcher.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Configuration(_) | GatewayError::InvalidRequest(_) => 400,
            GatewayError::SessionNotFound(_) | GatewayError::TaskNotFound(_) => 404,
            GatewayError::ProtocolViolation(_) => 409,
            GatewayError::LedgerInvocation(_) | GatewayError::StageTimeout { .. } => 422,
            GatewayError::CrashRecovery(_)
            | GatewayError::Storage(_)
            | GatewayError::Internal(_) => 500,
            GatewayError::CounterpartyUnreachable(_) => 503,
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GatewayError::Configuration("x".into()).code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            GatewayError::ProtocolViolation("x".into()).code(),
            "PROTOCOL_VIOLATION"
        );
        assert_eq!(
            GatewayError::CrashRecovery("x".into()).code(),
            "CRASH_RECOVERY_ERROR"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(GatewayError::Configuration("x".into()).http_status(), 400);
        assert_eq!(GatewayError::SessionNotFound("x".into()).http_status(), 404);
        assert_eq!(
            GatewayError::ProtocolViolation("x".into()).http_status(),
            409
        );
        assert_eq!(GatewayError::Storage("x".into()).http_status(), 500);
        assert_eq!(
            GatewayError::CounterpartyUnreachable("x".into()).http_status(),
            503
        );
    }

    #[test]
    fn test_display() {
        let err = GatewayError::Configuration("no approve address".into());
        assert_eq!(err.to_string(), "Configuration error: no approve address");
    }
}
