//! Oracle Manager
//!
//! Independent relay engine built only on leaf `invoke`: one-shot or
//! event-triggered read/update tasks across two leaves. A task decomposes
//! into one operation (Read, Update) or two (ReadAndUpdate, where the
//! Update's input defaults to the Read's result). Every operation emits
//! log entries in strict order INIT -> EXEC -> DONE|FAIL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::leaf::{BridgeManager, ContractCall, EventFilter, InvokeMode};
use crate::storage::{LogEntry, LogPhase, LogWriter};

use super::listener::{ListenerHandle, spawn_listener};
use super::types::{
    OracleContract, OracleOperation, OracleOperationStatus, OracleOperationType, OracleTask,
    OracleTaskMode, OracleTaskRequest, OracleTaskStatus, OracleTaskType,
};

/// Shared context for relay execution; the listener loops hold a clone.
#[derive(Clone)]
pub(crate) struct RelayContext {
    pub leaves: Arc<BridgeManager>,
    pub log: LogWriter,
    pub call_timeout: Duration,
}

pub struct OracleManager {
    ctx: RelayContext,
    tasks: DashMap<String, Arc<RwLock<OracleTask>>>,
    listeners: DashMap<String, ListenerHandle>,
}

impl OracleManager {
    pub fn new(leaves: Arc<BridgeManager>, log: LogWriter, call_timeout: Duration) -> Self {
        Self {
            ctx: RelayContext {
                leaves,
                log,
                call_timeout,
            },
            tasks: DashMap::new(),
            listeners: DashMap::new(),
        }
    }

    /// One-shot execution: run the task immediately and return it completed.
    pub async fn execute_task(&self, request: OracleTaskRequest) -> Result<OracleTask, GatewayError> {
        request.validate()?;
        if request.mode != OracleTaskMode::OneTime {
            return Err(GatewayError::InvalidRequest(
                "execute is one-time only; register event-listening tasks instead".to_string(),
            ));
        }

        let task = request.into_task();
        let task_id = task.task_id.clone();
        info!(task_id = %task_id, task_type = task.task_type.as_str(), "Executing oracle task");

        let entry = Arc::new(RwLock::new(task));
        self.tasks.insert(task_id.clone(), entry.clone());

        if let Err(e) = process_task(&self.ctx, &entry, None).await {
            // Contained: the operation is marked Failed on the task itself.
            warn!(task_id = %task_id, error = %e, "Oracle task completed with failure");
        }
        entry.write().await.status = OracleTaskStatus::Inactive;

        Ok(entry.read().await.clone())
    }

    /// Register a task. One-time tasks run immediately; event-listening
    /// tasks subscribe to the source contract and stay `Active` until
    /// unregistered.
    pub async fn register_task(
        &self,
        request: OracleTaskRequest,
    ) -> Result<OracleTask, GatewayError> {
        request.validate()?;

        if request.mode == OracleTaskMode::OneTime {
            return self.execute_task(request).await;
        }

        let task = request.into_task();
        let task_id = task.task_id.clone();
        let source = task.source.clone().ok_or_else(|| {
            GatewayError::InvalidRequest("event-listening task without source".to_string())
        })?;
        let listening = task.listening.clone().ok_or_else(|| {
            GatewayError::InvalidRequest("event-listening task without options".to_string())
        })?;

        let leaf = self.ctx.leaves.leaf(&source.network_id)?;
        let filter = EventFilter {
            contract: contract_key(&leaf.ledger_kind(), &source),
            event_signature: listening.event_signature.clone(),
            field_indexes: listening.field_indexes.clone(),
        };
        let events = leaf.subscribe(&filter).await?;

        let entry = Arc::new(RwLock::new(task));
        self.tasks.insert(task_id.clone(), entry.clone());

        let handle = spawn_listener(self.ctx.clone(), task_id.clone(), entry.clone(), filter, events);
        self.listeners.insert(task_id.clone(), handle);

        info!(
            task_id = %task_id,
            network = %source.network_id,
            signature = %listening.event_signature,
            "Event-listening oracle task registered"
        );
        Ok(entry.read().await.clone())
    }

    /// Unregister a task: tear down its subscription promptly (an operation
    /// already dispatched to a leaf completes) and mark it `Inactive`.
    pub async fn unregister_task(&self, task_id: &str) -> Result<OracleTask, GatewayError> {
        let entry = self
            .tasks
            .get(task_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?;

        if let Some((_, handle)) = self.listeners.remove(task_id) {
            handle.shutdown().await;
        }

        entry.write().await.status = OracleTaskStatus::Inactive;
        info!(task_id = %task_id, "Oracle task unregistered");

        Ok(entry.read().await.clone())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<OracleTask, GatewayError> {
        let entry = self
            .tasks
            .get(task_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?;
        Ok(entry.read().await.clone())
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<OracleTaskStatus, GatewayError> {
        Ok(self.get_task(task_id).await?.status)
    }

    pub async fn tasks(&self) -> Vec<OracleTask> {
        // Snapshot the entries first; map guards must not be held across
        // the lock awaits.
        let entries: Vec<Arc<RwLock<OracleTask>>> =
            self.tasks.iter().map(|e| e.value().clone()).collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.read().await.clone());
        }
        tasks
    }

    /// Shut down all listeners (gateway stop).
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.listeners.remove(&id) {
                handle.shutdown().await;
            }
        }
        debug!("All oracle listeners stopped");
    }
}

/// The leaf-facing contract key differs per ledger kind: EVM contracts are
/// addressed, chaincode is named.
fn contract_key(kind: &crate::leaf::LedgerKind, contract: &OracleContract) -> String {
    match kind {
        crate::leaf::LedgerKind::Evm => contract.contract_address.clone(),
        crate::leaf::LedgerKind::Fabric => contract.contract_name.clone(),
    }
}

/// Decompose a task into operations and relay each.
///
/// For `ReadAndUpdate` the Read's full INIT/EXEC/DONE|FAIL triplet completes
/// before the Update's triplet begins, and the Update's parameters default
/// to the Read's output unless the destination declares its own.
pub(crate) async fn process_task(
    ctx: &RelayContext,
    entry: &Arc<RwLock<OracleTask>>,
    event_params: Option<Vec<String>>,
) -> Result<(), GatewayError> {
    let task = entry.read().await.clone();
    debug!(task_id = %task.task_id, "Processing oracle task");

    match task.task_type {
        OracleTaskType::Read => {
            let source = task.source.clone().ok_or_else(|| {
                GatewayError::InvalidRequest("read task without source".to_string())
            })?;
            relay_operation(ctx, entry, OracleOperationType::Read, source).await?;
        }
        OracleTaskType::Update => {
            let mut destination = task.destination.clone().ok_or_else(|| {
                GatewayError::InvalidRequest("update task without destination".to_string())
            })?;
            if let Some(params) = event_params {
                destination.params = params.into_iter().map(serde_json::Value::String).collect();
            }
            relay_operation(ctx, entry, OracleOperationType::Update, destination).await?;
        }
        OracleTaskType::ReadAndUpdate => {
            let mut write_params: Option<Vec<serde_json::Value>> = event_params
                .map(|params| params.into_iter().map(serde_json::Value::String).collect());

            // With event-derived parameters the read is skipped; the event
            // already carries the data to relay.
            if write_params.is_none() {
                let source = task.source.clone().ok_or_else(|| {
                    GatewayError::InvalidRequest("read-and-update task without source".to_string())
                })?;
                let output = relay_operation(ctx, entry, OracleOperationType::Read, source).await?;
                write_params = Some(vec![output]);
            }

            let mut destination = task.destination.clone().ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "read-and-update task without destination".to_string(),
                )
            })?;
            if destination.params.is_empty() {
                destination.params = write_params.unwrap_or_default();
            }
            relay_operation(ctx, entry, OracleOperationType::Update, destination).await?;
        }
    }

    debug!(task_id = %task.task_id, "Oracle task processed");
    Ok(())
}

/// Dispatch one operation to its leaf, recording the log triplet and
/// appending the operation to the task.
pub(crate) async fn relay_operation(
    ctx: &RelayContext,
    entry: &Arc<RwLock<OracleTask>>,
    op_type: OracleOperationType,
    contract: OracleContract,
) -> Result<serde_json::Value, GatewayError> {
    let task_id = entry.read().await.task_id.clone();
    let operation_id = uuid::Uuid::new_v4().to_string();

    ctx.log
        .log(
            LogEntry::new(task_id.clone(), op_type.entry_type(), LogPhase::Init)
                .with_operation(operation_id.clone())
                .with_metadata(serde_json::json!({
                    "network": contract.network_id,
                    "method": contract.method,
                })),
        )
        .await;

    let mut operation = OracleOperation {
        id: operation_id.clone(),
        op_type,
        network_id: contract.network_id.clone(),
        contract: contract.clone(),
        status: OracleOperationStatus::Failed,
        output: None,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    };

    let result = match ctx.leaves.leaf(&contract.network_id) {
        Ok(leaf) => {
            let call = ContractCall {
                contract_name: contract.contract_name.clone(),
                contract_address: contract.contract_address.clone(),
                method: contract.method.clone(),
                params: contract.params.clone(),
            };
            let mode = match op_type {
                OracleOperationType::Read => InvokeMode::Call,
                OracleOperationType::Update => InvokeMode::Send,
            };

            ctx.log
                .log(
                    LogEntry::new(task_id.clone(), op_type.entry_type(), LogPhase::Exec)
                        .with_operation(operation_id.clone()),
                )
                .await;

            match tokio::time::timeout(ctx.call_timeout, leaf.invoke(&call, mode)).await {
                Ok(Ok(outcome)) => Ok(outcome.output),
                Ok(Err(e)) => Err(GatewayError::from(e)),
                Err(_) => Err(GatewayError::Internal(format!(
                    "oracle call timed out after {:?}",
                    ctx.call_timeout
                ))),
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            operation.status = OracleOperationStatus::Success;
            operation.output = Some(output.clone());
            entry.write().await.operations.push(operation);

            ctx.log
                .log(
                    LogEntry::new(task_id.clone(), op_type.entry_type(), LogPhase::Done)
                        .with_operation(operation_id)
                        .with_metadata(serde_json::json!({ "output": output })),
                )
                .await;
            Ok(output)
        }
        Err(e) => {
            operation.output = Some(serde_json::json!(e.to_string()));
            entry.write().await.operations.push(operation);

            ctx.log
                .log(
                    LogEntry::new(task_id.clone(), op_type.entry_type(), LogPhase::Fail)
                        .with_operation(operation_id)
                        .with_metadata(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
            warn!(task_id = %task_id, error = %e, "Oracle operation failed");
            Err(e)
        }
    }
}
