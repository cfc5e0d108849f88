//! Counterparty Protocol Client
//!
//! Outbound channel used to exchange protocol messages with the other
//! gateway and keep both sides' sessions in lockstep. Two implementations:
//!
//! - [`LocalCounterparty`]: both networks are connected to this gateway
//!   instance (the single-gateway deployment). It verifies evidence and
//!   drives the destination leaf in-process, and is the server side behind
//!   the HTTP counterparty endpoints.
//! - [`HttpCounterparty`]: the peer gateway is remote; messages travel as
//!   JSON over its counterparty endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::leaf::{Asset, BridgeManager, ClaimFormat, TransactionReceipt};
use crate::ontology::TransferStrategy;
use crate::registry::GatewayIdentity;
use crate::session::locks::AccountLocks;
use crate::session::types::SessionId;
use crate::storage::SessionStore;

/// Stage-1 transfer proposal exchanged between gateways.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProposal {
    pub session_id: SessionId,
    pub context_id: Option<String>,
    pub source_network: String,
    pub destination_network: String,
    pub asset: Asset,
    pub claim_format: ClaimFormat,
    pub sender: GatewayIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ProposalDecision {
    Accepted,
    Rejected { reason: String },
}

#[async_trait]
pub trait CounterpartyClient: Send + Sync {
    /// Exchange gateway identities ahead of any session.
    async fn exchange_identity(
        &self,
        local: &GatewayIdentity,
    ) -> Result<GatewayIdentity, GatewayError>;

    /// Stage 1: present a transfer proposal.
    async fn propose_transfer(
        &self,
        proposal: &TransferProposal,
    ) -> Result<ProposalDecision, GatewayError>;

    /// Stage 2: present the lock proof; the counterparty independently
    /// verifies it before acknowledging.
    async fn verify_lock_evidence(
        &self,
        session_id: &SessionId,
        proof: &TransactionReceipt,
    ) -> Result<bool, GatewayError>;

    /// Stage 3: ask the counterparty to mint/unlock on the destination leaf
    /// and return its commitment receipt. Idempotent per session.
    async fn request_commitment(
        &self,
        session_id: &SessionId,
    ) -> Result<TransactionReceipt, GatewayError>;
}

// ============================================================================
// In-process counterparty (single-gateway deployment)
// ============================================================================

pub struct LocalCounterparty {
    identity: GatewayIdentity,
    leaves: Arc<BridgeManager>,
    /// The counterparty-shared scope; the session coordinator writes stage
    /// transitions here and this side reads them back as the authoritative
    /// view of the session (it survives a coordinator restart).
    remote_store: Arc<dyn SessionStore>,
    account_locks: Arc<AccountLocks>,
}

impl LocalCounterparty {
    pub fn new(
        identity: GatewayIdentity,
        leaves: Arc<BridgeManager>,
        remote_store: Arc<dyn SessionStore>,
        account_locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            identity,
            leaves,
            remote_store,
            account_locks,
        }
    }
}

#[async_trait]
impl CounterpartyClient for LocalCounterparty {
    async fn exchange_identity(
        &self,
        _local: &GatewayIdentity,
    ) -> Result<GatewayIdentity, GatewayError> {
        Ok(self.identity.clone())
    }

    async fn propose_transfer(
        &self,
        proposal: &TransferProposal,
    ) -> Result<ProposalDecision, GatewayError> {
        let leaf = match self.leaves.leaf(&proposal.destination_network) {
            Ok(leaf) => leaf,
            Err(_) => {
                return Ok(ProposalDecision::Rejected {
                    reason: format!(
                        "destination network {} not served here",
                        proposal.destination_network
                    ),
                });
            }
        };

        if !leaf
            .supported_claim_formats()
            .contains(&proposal.claim_format)
        {
            return Ok(ProposalDecision::Rejected {
                reason: format!(
                    "claim format {:?} not supported on {}",
                    proposal.claim_format, proposal.destination_network
                ),
            });
        }

        if proposal.asset.amount() == Some(0) {
            return Ok(ProposalDecision::Rejected {
                reason: "zero-amount transfer".to_string(),
            });
        }

        info!(
            session_id = %proposal.session_id,
            source = %proposal.source_network,
            destination = %proposal.destination_network,
            asset = %proposal.asset.asset_id,
            "Transfer proposal accepted"
        );
        Ok(ProposalDecision::Accepted)
    }

    async fn verify_lock_evidence(
        &self,
        session_id: &SessionId,
        proof: &TransactionReceipt,
    ) -> Result<bool, GatewayError> {
        let record = self
            .remote_store
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        if proof.network_id != record.source_network {
            warn!(
                session_id = %session_id,
                expected = %record.source_network,
                got = %proof.network_id,
                "Lock proof names the wrong network"
            );
            return Ok(false);
        }

        let expected_method = match record.strategy {
            TransferStrategy::LockUnlock => "lock",
            TransferStrategy::BurnMint => "burn",
        };
        if !proof.method.eq_ignore_ascii_case(expected_method) {
            warn!(
                session_id = %session_id,
                expected = expected_method,
                got = %proof.method,
                "Lock proof carries the wrong operation"
            );
            return Ok(false);
        }

        // The proof payload must name the session's asset unit; an evidence
        // digest that parses but moves a different quantity is a forgery.
        let args = proof.payload.get("args").and_then(|a| a.as_array());
        let unit_matches = args
            .map(|args| args.contains(&record.asset.unit_value()))
            .unwrap_or(false);
        if !unit_matches {
            warn!(session_id = %session_id, "Lock proof does not cover the proposed unit");
            return Ok(false);
        }

        Ok(true)
    }

    async fn request_commitment(
        &self,
        session_id: &SessionId,
    ) -> Result<TransactionReceipt, GatewayError> {
        let record = self
            .remote_store
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        // Idempotency: a commitment already produced for this session is
        // returned as-is, never re-executed (no double mint after a retry
        // or a crash-resume).
        if let Some(commitment) = record.commitment {
            info!(session_id = %session_id, "Returning recorded commitment");
            return Ok(commitment);
        }

        let leaf = self.leaves.leaf(&record.destination_network)?;
        let binding = &record.destination_binding;
        let asset = &record.asset;

        let _guard = self
            .account_locks
            .acquire(&record.destination_network, &asset.owner)
            .await;

        // Unlock when the destination wrapper already escrows the asset
        // (return leg of a previous transfer), mint otherwise.
        let escrowed = leaf
            .check_balance(&binding.contract_address, leaf.wrapper_address())
            .await
            .unwrap_or(0);
        let use_unlock = match asset.amount() {
            Some(amount) => escrowed >= amount,
            None => escrowed > 0,
        };

        let receipt = if use_unlock {
            leaf.unlock(asset, binding).await?
        } else {
            leaf.mint(asset, binding).await?
        };

        self.remote_store
            .record_commitment(session_id, &receipt)
            .await?;

        info!(
            session_id = %session_id,
            network = %record.destination_network,
            method = %receipt.method,
            tx_id = %receipt.tx_id,
            "Destination commitment produced"
        );
        Ok(receipt)
    }
}

// ============================================================================
// HTTP counterparty (two-gateway deployment)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub session_id: SessionId,
    pub proof: TransactionReceipt,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvidenceResponse {
    pub verified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitmentRequest {
    pub session_id: SessionId,
}

pub struct HttpCounterparty {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCounterparty {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/counterparty/{path}", self.base_url)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::CounterpartyUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::ProtocolViolation(format!(
                "counterparty returned {} for {path}",
                response.status()
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| GatewayError::ProtocolViolation(format!("malformed reply: {e}")))
    }
}

#[async_trait]
impl CounterpartyClient for HttpCounterparty {
    async fn exchange_identity(
        &self,
        local: &GatewayIdentity,
    ) -> Result<GatewayIdentity, GatewayError> {
        self.post_json("identity", local).await
    }

    async fn propose_transfer(
        &self,
        proposal: &TransferProposal,
    ) -> Result<ProposalDecision, GatewayError> {
        self.post_json("proposal", proposal).await
    }

    async fn verify_lock_evidence(
        &self,
        session_id: &SessionId,
        proof: &TransactionReceipt,
    ) -> Result<bool, GatewayError> {
        let response: EvidenceResponse = self
            .post_json(
                "evidence",
                &EvidenceRequest {
                    session_id: *session_id,
                    proof: proof.clone(),
                },
            )
            .await?;
        Ok(response.verified)
    }

    async fn request_commitment(
        &self,
        session_id: &SessionId,
    ) -> Result<TransactionReceipt, GatewayError> {
        self.post_json(
            "commitment",
            &CommitmentRequest {
                session_id: *session_id,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::leaf::{AssetUnit, LedgerKind, SimulatedLedger};
    use crate::ontology::AssetBinding;
    use crate::session::types::{SessionRecord, TransferRequest};
    use crate::storage::MemorySessionStore;

    fn identity() -> GatewayIdentity {
        GatewayIdentity {
            id: "gw-a".to_string(),
            name: "gateway-a".to_string(),
            version: Default::default(),
            address: "http://localhost".to_string(),
            server_port: 3010,
            client_port: 3011,
            api_port: 4010,
            connected_ledgers: vec![],
        }
    }

    fn network_config(network_id: &str) -> NetworkConfig {
        NetworkConfig {
            network_id: network_id.to_string(),
            ledger_kind: LedgerKind::Evm,
            signing_credential: "signer".to_string(),
            wrapper_contract_name: "AssetWrapper".to_string(),
            wrapper_contract_address: "0xwrapper".to_string(),
            approve_address: Some("0xwrapper".to_string()),
            gas_limit: 1_000_000,
            claim_formats: vec![ClaimFormat::Default],
            options: Default::default(),
        }
    }

    fn binding(network_id: &str) -> AssetBinding {
        AssetBinding {
            network_id: network_id.to_string(),
            contract_name: "CBDCToken".to_string(),
            contract_address: "0xtoken".to_string(),
        }
    }

    async fn setup() -> (LocalCounterparty, Arc<MemorySessionStore>, SessionRecord) {
        let manager = Arc::new(BridgeManager::from_configs(
            &[network_config("fabric-local")],
            |c| Arc::new(SimulatedLedger::new(c.network_id.clone())),
        ));
        let remote = Arc::new(MemorySessionStore::new());

        let request = TransferRequest {
            context_id: None,
            source_network: "besu-local".to_string(),
            destination_network: "fabric-local".to_string(),
            asset: Asset {
                asset_id: "CBDC1".to_string(),
                owner: "0xalice".to_string(),
                unit: AssetUnit::Fungible { amount: 100 },
            },
            claim_format: ClaimFormat::Default,
        };
        let record = SessionRecord::new(
            SessionId::new(),
            &request,
            TransferStrategy::LockUnlock,
            binding("besu-local"),
            binding("fabric-local"),
        );
        remote.upsert(&record).await.unwrap();

        let counterparty = LocalCounterparty::new(
            identity(),
            manager,
            remote.clone(),
            Arc::new(AccountLocks::new()),
        );
        (counterparty, remote, record)
    }

    fn lock_proof(record: &SessionRecord) -> TransactionReceipt {
        TransactionReceipt {
            tx_id: "0xabc".to_string(),
            network_id: record.source_network.clone(),
            block: 3,
            method: "lock".to_string(),
            payload: serde_json::json!({
                "contract": "0xtoken",
                "method": "lock",
                "args": ["0xalice", "0xwrapper", 100],
            }),
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_evidence_verification() {
        let (counterparty, _, record) = setup().await;

        let good = lock_proof(&record);
        assert!(
            counterparty
                .verify_lock_evidence(&record.session_id, &good)
                .await
                .unwrap()
        );

        let mut wrong_network = good.clone();
        wrong_network.network_id = "other-net".to_string();
        assert!(
            !counterparty
                .verify_lock_evidence(&record.session_id, &wrong_network)
                .await
                .unwrap()
        );

        let mut wrong_method = good.clone();
        wrong_method.method = "mint".to_string();
        assert!(
            !counterparty
                .verify_lock_evidence(&record.session_id, &wrong_method)
                .await
                .unwrap()
        );

        let mut wrong_amount = good.clone();
        wrong_amount.payload = serde_json::json!({
            "args": ["0xalice", "0xwrapper", 55],
        });
        assert!(
            !counterparty
                .verify_lock_evidence(&record.session_id, &wrong_amount)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_commitment_is_idempotent() {
        let (counterparty, remote, record) = setup().await;

        let first = counterparty
            .request_commitment(&record.session_id)
            .await
            .unwrap();
        assert_eq!(first.method, "mint");

        // Second request must return the recorded commitment, not mint again.
        let second = counterparty
            .request_commitment(&record.session_id)
            .await
            .unwrap();
        assert_eq!(first.tx_id, second.tx_id);

        let stored = remote.get(&record.session_id).await.unwrap().unwrap();
        assert_eq!(stored.commitment.unwrap().tx_id, first.tx_id);
    }

    #[tokio::test]
    async fn test_proposal_rejects_unserved_network() {
        let (counterparty, _, record) = setup().await;
        let proposal = TransferProposal {
            session_id: record.session_id,
            context_id: None,
            source_network: "besu-local".to_string(),
            destination_network: "unknown-net".to_string(),
            asset: record.asset.clone(),
            claim_format: ClaimFormat::Default,
            sender: identity(),
        };

        match counterparty.propose_transfer(&proposal).await.unwrap() {
            ProposalDecision::Rejected { reason } => {
                assert!(reason.contains("unknown-net"));
            }
            ProposalDecision::Accepted => panic!("proposal should have been rejected"),
        }
    }
}
