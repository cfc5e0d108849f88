//! In-Memory Stores
//!
//! Session and log stores backed by process memory. Used for the Remote
//! scope of single-gateway deployments and throughout the test suite. No
//! durability: a restart loses everything, which is exactly what the crash
//! tests rely on to model the counterparty-visible scope separately from the
//! Local store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::leaf::TransactionReceipt;
use crate::session::state::SessionState;
use crate::session::types::{SessionId, SessionRecord};

use super::{LogEntry, LogStore, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(record: &mut SessionRecord, new: SessionState) {
        record.state = new;
        record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        if new.is_terminal() {
            record.ended_at_ms = Some(record.updated_at_ms);
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(record.session_id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, GatewayError> {
        Ok(self.sessions.read().await.get(&id.to_string()).cloned())
    }

    async fn get_by_context(
        &self,
        context_id: &str,
    ) -> Result<Option<SessionRecord>, GatewayError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|r| r.context_id.as_deref() == Some(context_id))
            .cloned())
    }

    async fn update_state_if(
        &self,
        id: &SessionId,
        expected: SessionState,
        new: SessionState,
    ) -> Result<bool, GatewayError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id.to_string()) {
            Some(record) if record.state == expected => {
                Self::touch(record, new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_state_with_error(
        &self,
        id: &SessionId,
        expected: SessionState,
        new: SessionState,
        error: &str,
    ) -> Result<bool, GatewayError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id.to_string()) {
            Some(record) if record.state == expected => {
                record.error = Some(error.to_string());
                Self::touch(record, new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_proof(
        &self,
        id: &SessionId,
        proof: &TransactionReceipt,
    ) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.get_mut(&id.to_string()) {
            record.lock_proof = Some(proof.clone());
            record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        Ok(())
    }

    async fn record_commitment(
        &self,
        id: &SessionId,
        commitment: &TransactionReceipt,
    ) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.get_mut(&id.to_string()) {
            record.commitment = Some(commitment.clone());
            record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        Ok(())
    }

    async fn set_recovery_flag(&self, id: &SessionId, flagged: bool) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.get_mut(&id.to_string()) {
            record.recovery_flagged = flagged;
            record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        Ok(())
    }

    async fn increment_retry(&self, id: &SessionId) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.get_mut(&id.to_string()) {
            record.retry_count += 1;
            record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        Ok(())
    }

    async fn find_non_terminal(&self) -> Result<Vec<SessionRecord>, GatewayError> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at_ms);
        Ok(records)
    }

    async fn find_stale(&self, threshold: Duration) -> Result<Vec<SessionRecord>, GatewayError> {
        let cutoff = chrono::Utc::now().timestamp_millis() - threshold.as_millis() as i64;
        let mut records: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|r| !r.state.is_terminal() && r.updated_at_ms < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at_ms);
        Ok(records)
    }

    async fn find_in_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<SessionRecord>, GatewayError> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|r| r.started_at_ms >= from_ms && r.started_at_ms <= to_ms)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at_ms);
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<Vec<LogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<(), GatewayError> {
        let mut entries = self.entries.write().await;
        let mut stored = entry.clone();
        stored.id = Some(entries.len() as i64 + 1);
        entries.push(stored);
        Ok(())
    }

    async fn entries_for(&self, context_id: &str) -> Result<Vec<LogEntry>, GatewayError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn entries_in_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<LogEntry>, GatewayError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.timestamp_ms >= from_ms && e.timestamp_ms <= to_ms)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{Asset, AssetUnit, ClaimFormat};
    use crate::ontology::{AssetBinding, TransferStrategy};
    use crate::session::types::TransferRequest;
    use crate::storage::LogPhase;

    fn record() -> SessionRecord {
        let request = TransferRequest {
            context_id: Some("ctx-1".to_string()),
            source_network: "besu-local".to_string(),
            destination_network: "fabric-local".to_string(),
            asset: Asset {
                asset_id: "CBDC1".to_string(),
                owner: "0xalice".to_string(),
                unit: AssetUnit::Fungible { amount: 100 },
            },
            claim_format: ClaimFormat::Default,
        };
        let binding = AssetBinding {
            network_id: "besu-local".to_string(),
            contract_name: "CBDCToken".to_string(),
            contract_address: "0xtoken".to_string(),
        };
        SessionRecord::new(
            SessionId::new(),
            &request,
            TransferStrategy::LockUnlock,
            binding.clone(),
            binding,
        )
    }

    #[tokio::test]
    async fn test_cas_succeeds_only_on_expected_state() {
        let store = MemorySessionStore::new();
        let record = record();
        store.upsert(&record).await.unwrap();

        assert!(
            store
                .update_state_if(&record.session_id, SessionState::Proposing, SessionState::Proposed)
                .await
                .unwrap()
        );
        // Second CAS from the stale expected state must fail.
        assert!(
            !store
                .update_state_if(&record.session_id, SessionState::Proposing, SessionState::Proposed)
                .await
                .unwrap()
        );

        let stored = store.get(&record.session_id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Proposed);
    }

    #[tokio::test]
    async fn test_terminal_transition_sets_end_timestamp() {
        let store = MemorySessionStore::new();
        let record = record();
        store.upsert(&record).await.unwrap();

        store
            .update_state_with_error(
                &record.session_id,
                SessionState::Proposing,
                SessionState::Failed,
                "counterparty rejected",
            )
            .await
            .unwrap();

        let stored = store.get(&record.session_id).await.unwrap().unwrap();
        assert!(stored.ended_at_ms.is_some());
        assert_eq!(stored.error.as_deref(), Some("counterparty rejected"));
        assert!(store.find_non_terminal().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_context() {
        let store = MemorySessionStore::new();
        let record = record();
        store.upsert(&record).await.unwrap();

        let found = store.get_by_context("ctx-1").await.unwrap().unwrap();
        assert_eq!(found.session_id, record.session_id);
        assert!(store.get_by_context("ctx-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_store_assigns_increasing_ids() {
        let store = MemoryLogStore::new();
        for phase in [LogPhase::Init, LogPhase::Exec, LogPhase::Done] {
            store
                .append(&LogEntry::new("task-1", "oracle-read", phase))
                .await
                .unwrap();
        }

        let entries = store.entries_for("task-1").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(entries[0].phase, LogPhase::Init);
        assert_eq!(entries[2].phase, LogPhase::Done);
    }
}
