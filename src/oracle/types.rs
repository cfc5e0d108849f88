//! Oracle Task Types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Contract descriptor for one side of a relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleContract {
    pub network_id: String,
    pub contract_name: String,
    pub contract_address: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OracleTaskType {
    Read,
    Update,
    ReadAndUpdate,
}

impl OracleTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleTaskType::Read => "READ",
            OracleTaskType::Update => "UPDATE",
            OracleTaskType::ReadAndUpdate => "READ_AND_UPDATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OracleTaskMode {
    OneTime,
    EventListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleTaskStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleOperationType {
    Read,
    Update,
}

impl OracleOperationType {
    /// Log entry type tag for this operation kind.
    pub fn entry_type(&self) -> &'static str {
        match self {
            OracleOperationType::Read => "oracle-read",
            OracleOperationType::Update => "oracle-update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleOperationStatus {
    Success,
    Failed,
}

/// Event subscription parameters for `EventListening` tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningOptions {
    pub event_signature: String,
    /// Positional fields of the matched event used as write parameters;
    /// `None` relays every field.
    #[serde(default)]
    pub field_indexes: Option<Vec<usize>>,
}

/// One executed (or failed) relay operation. Owned exclusively by its task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleOperation {
    pub id: String,
    pub op_type: OracleOperationType,
    pub network_id: String,
    pub contract: OracleContract,
    pub status: OracleOperationStatus,
    pub output: Option<serde_json::Value>,
    pub timestamp_ms: i64,
}

/// A registered or executed oracle task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleTask {
    pub task_id: String,
    pub task_type: OracleTaskType,
    pub mode: OracleTaskMode,
    pub source: Option<OracleContract>,
    pub destination: Option<OracleContract>,
    pub listening: Option<ListeningOptions>,
    pub status: OracleTaskStatus,
    pub operations: Vec<OracleOperation>,
    pub registered_at_ms: i64,
}

impl fmt::Display for OracleTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OracleTask[{}] type={} status={:?} operations={}",
            self.task_id,
            self.task_type.as_str(),
            self.status,
            self.operations.len()
        )
    }
}

/// Registration/execution request for an oracle task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleTaskRequest {
    pub task_type: OracleTaskType,
    pub mode: OracleTaskMode,
    #[serde(default)]
    pub source: Option<OracleContract>,
    #[serde(default)]
    pub destination: Option<OracleContract>,
    #[serde(default)]
    pub listening: Option<ListeningOptions>,
}

impl OracleTaskRequest {
    /// Validate side/option requirements for the task type and mode.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let needs_source = matches!(
            self.task_type,
            OracleTaskType::Read | OracleTaskType::ReadAndUpdate
        );
        let needs_destination = matches!(
            self.task_type,
            OracleTaskType::Update | OracleTaskType::ReadAndUpdate
        );

        if needs_source && self.source.is_none() {
            return Err(GatewayError::InvalidRequest(format!(
                "{} task requires a source contract",
                self.task_type.as_str()
            )));
        }
        if needs_destination && self.destination.is_none() {
            return Err(GatewayError::InvalidRequest(format!(
                "{} task requires a destination contract",
                self.task_type.as_str()
            )));
        }

        if self.mode == OracleTaskMode::EventListening {
            if self.source.is_none() {
                return Err(GatewayError::InvalidRequest(
                    "event-listening task requires a source contract".to_string(),
                ));
            }
            if self.listening.is_none() {
                return Err(GatewayError::InvalidRequest(
                    "event-listening task requires listening options".to_string(),
                ));
            }
            if self.destination.is_none() {
                return Err(GatewayError::InvalidRequest(
                    "event-listening task requires a destination write".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn into_task(self) -> OracleTask {
        OracleTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            task_type: self.task_type,
            mode: self.mode,
            source: self.source,
            destination: self.destination,
            listening: self.listening,
            status: OracleTaskStatus::Active,
            operations: Vec::new(),
            registered_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
