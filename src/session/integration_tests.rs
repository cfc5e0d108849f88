//! Integration Tests for the Session Coordinator
//!
//! These tests verify the complete protocol flow without any external
//! ledger: simulated connectors on both sides, in-memory stores, and the
//! in-process counterparty.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::config::{NetworkConfig, SessionConfig};
    use crate::counterparty::{
        CounterpartyClient, LocalCounterparty, ProposalDecision, TransferProposal,
    };
    use crate::error::GatewayError;
    use crate::leaf::{
        Asset, AssetUnit, BridgeManager, ClaimFormat, LedgerError, LedgerKind, SimulatedLedger,
        TransactionReceipt,
    };
    use crate::ontology::{AssetBinding, AssetOntology, OntologyRegistry, TokenType, TransferStrategy};
    use crate::registry::{ConnectedLedger, GatewayIdentity, GatewayRegistry};
    use crate::session::coordinator::SessionCoordinator;
    use crate::session::locks::AccountLocks;
    use crate::session::state::SessionState;
    use crate::session::types::{SessionId, TransferRequest};
    use crate::storage::{LogWriter, MemoryLogStore, MemorySessionStore};

    const SOURCE: &str = "besu-local";
    const DESTINATION: &str = "fabric-local";
    const SOURCE_TOKEN: &str = "0xtoken";
    const DESTINATION_TOKEN: &str = "cbdc-chaincode";
    const SOURCE_WRAPPER: &str = "0xwrapper";
    const OWNER: &str = "0xalice";

    /// Counterparty wrapper with switchable failure modes.
    struct FlakyCounterparty {
        inner: LocalCounterparty,
        reject_proposal: AtomicBool,
        reject_evidence: AtomicBool,
        fail_commitment: AtomicBool,
    }

    impl FlakyCounterparty {
        fn new(inner: LocalCounterparty) -> Self {
            Self {
                inner,
                reject_proposal: AtomicBool::new(false),
                reject_evidence: AtomicBool::new(false),
                fail_commitment: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CounterpartyClient for FlakyCounterparty {
        async fn exchange_identity(
            &self,
            local: &GatewayIdentity,
        ) -> Result<GatewayIdentity, GatewayError> {
            self.inner.exchange_identity(local).await
        }

        async fn propose_transfer(
            &self,
            proposal: &TransferProposal,
        ) -> Result<ProposalDecision, GatewayError> {
            if self.reject_proposal.load(Ordering::SeqCst) {
                return Ok(ProposalDecision::Rejected {
                    reason: "mock rejection".to_string(),
                });
            }
            self.inner.propose_transfer(proposal).await
        }

        async fn verify_lock_evidence(
            &self,
            session_id: &SessionId,
            proof: &TransactionReceipt,
        ) -> Result<bool, GatewayError> {
            if self.reject_evidence.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.inner.verify_lock_evidence(session_id, proof).await
        }

        async fn request_commitment(
            &self,
            session_id: &SessionId,
        ) -> Result<TransactionReceipt, GatewayError> {
            if self.fail_commitment.load(Ordering::SeqCst) {
                return Err(GatewayError::LedgerInvocation(LedgerError::Revert {
                    network: DESTINATION.to_string(),
                    method: "mint".to_string(),
                    detail: "mock commitment failure".to_string(),
                }));
            }
            self.inner.request_commitment(session_id).await
        }
    }

    struct TestHarness {
        coordinator: SessionCoordinator,
        counterparty: Arc<FlakyCounterparty>,
        source_ledger: Arc<SimulatedLedger>,
        destination_ledger: Arc<SimulatedLedger>,
        log_store: Arc<MemoryLogStore>,
        log: LogWriter,
    }

    fn network_config(network_id: &str, kind: LedgerKind, wrapper: &str) -> NetworkConfig {
        NetworkConfig {
            network_id: network_id.to_string(),
            ledger_kind: kind,
            signing_credential: "bridge-signer".to_string(),
            wrapper_contract_name: wrapper.to_string(),
            wrapper_contract_address: wrapper.to_string(),
            approve_address: Some(wrapper.to_string()),
            gas_limit: 1_000_000,
            claim_formats: vec![ClaimFormat::Default],
            options: Default::default(),
        }
    }

    fn identity() -> GatewayIdentity {
        GatewayIdentity {
            id: "gw-a".to_string(),
            name: "gateway-a".to_string(),
            version: Default::default(),
            address: "http://127.0.0.1".to_string(),
            server_port: 3010,
            client_port: 3011,
            api_port: 4010,
            connected_ledgers: vec![
                ConnectedLedger {
                    network_id: SOURCE.to_string(),
                    ledger_kind: LedgerKind::Evm,
                },
                ConnectedLedger {
                    network_id: DESTINATION.to_string(),
                    ledger_kind: LedgerKind::Fabric,
                },
            ],
        }
    }

    fn ontology(strategy: TransferStrategy) -> OntologyRegistry {
        OntologyRegistry::from_assets(vec![AssetOntology {
            asset_id: "CBDC1".to_string(),
            token_type: TokenType::Fungible,
            strategy,
            bindings: vec![
                AssetBinding {
                    network_id: SOURCE.to_string(),
                    contract_name: "CBDCToken".to_string(),
                    contract_address: SOURCE_TOKEN.to_string(),
                },
                AssetBinding {
                    network_id: DESTINATION.to_string(),
                    contract_name: DESTINATION_TOKEN.to_string(),
                    contract_address: DESTINATION_TOKEN.to_string(),
                },
            ],
        }])
    }

    fn harness(strategy: TransferStrategy) -> TestHarness {
        let source_ledger = Arc::new(SimulatedLedger::new(SOURCE));
        let destination_ledger = Arc::new(SimulatedLedger::new(DESTINATION));

        let manager = Arc::new(BridgeManager::new());
        manager.register(
            network_config(SOURCE, LedgerKind::Evm, SOURCE_WRAPPER),
            source_ledger.clone(),
        );
        manager.register(
            network_config(DESTINATION, LedgerKind::Fabric, "asset-wrapper"),
            destination_ledger.clone(),
        );

        let local = Arc::new(MemorySessionStore::new());
        let remote = Arc::new(MemorySessionStore::new());
        let log_store = Arc::new(MemoryLogStore::new());
        let log = LogWriter::spawn(log_store.clone());
        let account_locks = Arc::new(AccountLocks::new());

        let counterparty = Arc::new(FlakyCounterparty::new(LocalCounterparty::new(
            identity(),
            manager.clone(),
            remote.clone(),
            account_locks.clone(),
        )));

        let registry = Arc::new(GatewayRegistry::new(identity(), vec![identity()]));

        let coordinator = SessionCoordinator::new(
            local,
            remote,
            manager,
            Arc::new(ontology(strategy)),
            registry,
            counterparty.clone(),
            account_locks,
            log.clone(),
            SessionConfig {
                stage_timeout_secs: 5,
                max_steps: 25,
            },
        );

        TestHarness {
            coordinator,
            counterparty,
            source_ledger,
            destination_ledger,
            log_store,
            log,
        }
    }

    fn fungible_request(context_id: Option<&str>, amount: u64) -> TransferRequest {
        TransferRequest {
            context_id: context_id.map(|s| s.to_string()),
            source_network: SOURCE.to_string(),
            destination_network: DESTINATION.to_string(),
            asset: Asset {
                asset_id: "CBDC1".to_string(),
                owner: OWNER.to_string(),
                unit: AssetUnit::Fungible { amount },
            },
            claim_format: ClaimFormat::Default,
        }
    }

    async fn balance(ledger: &SimulatedLedger, contract: &str, account: &str) -> u64 {
        use crate::leaf::{LedgerConnector, TransactionRequest};
        ledger
            .query(&TransactionRequest {
                contract: contract.to_string(),
                method: "balanceOf".to_string(),
                args: vec![serde_json::json!(account)],
                sender: "test".to_string(),
                gas_limit: None,
            })
            .await
            .unwrap()
            .as_u64()
            .unwrap()
    }

    // ========================================================================
    // Happy Path Tests
    // ========================================================================

    /// 100 units move A -> B exactly once: owner drained on A, wrapper
    /// emptied on A after finalization, owner credited on B.
    #[tokio::test]
    async fn test_fungible_lock_unlock_happy_path() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::Committed);

        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 0);
        assert_eq!(
            balance(&h.source_ledger, SOURCE_TOKEN, SOURCE_WRAPPER).await,
            0
        );
        assert_eq!(
            balance(&h.destination_ledger, DESTINATION_TOKEN, OWNER).await,
            100
        );

        let record = h.coordinator.get(session_id).await.unwrap().unwrap();
        assert!(record.lock_proof.is_some());
        assert!(record.commitment.is_some());
        assert!(record.ended_at_ms.is_some());
        assert_eq!(record.counterparty_id.as_deref(), Some("gw-a"));
    }

    #[tokio::test]
    async fn test_fungible_burn_mint_happy_path() {
        let h = harness(TransferStrategy::BurnMint);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 250);

        let session_id = h.coordinator.create(fungible_request(None, 250)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::Committed);

        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 0);
        assert_eq!(
            balance(&h.destination_ledger, DESTINATION_TOKEN, OWNER).await,
            250
        );
    }

    // ========================================================================
    // Failure & Rollback Tests
    // ========================================================================

    /// Proposal rejection fails the session in stage 1, before any movement.
    #[tokio::test]
    async fn test_proposal_rejection_fails_without_movement() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);
        h.counterparty.reject_proposal.store(true, Ordering::SeqCst);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::Failed);

        // Nothing moved.
        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 100);

        let record = h.coordinator.get(session_id).await.unwrap().unwrap();
        assert!(record.error.as_deref().unwrap().contains("mock rejection"));
    }

    /// Evidence rejection rolls the escrow back to the owner.
    #[tokio::test]
    async fn test_evidence_rejection_rolls_back_escrow() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);
        h.counterparty.reject_evidence.store(true, Ordering::SeqCst);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::RolledBack);

        // The escrowed unit went back to its owner; nothing reached B.
        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 100);
        assert_eq!(
            balance(&h.source_ledger, SOURCE_TOKEN, SOURCE_WRAPPER).await,
            0
        );
        assert_eq!(
            balance(&h.destination_ledger, DESTINATION_TOKEN, OWNER).await,
            0
        );
    }

    /// An explicit commitment failure releases the source escrow.
    #[tokio::test]
    async fn test_commitment_failure_rolls_back() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);
        h.counterparty.fail_commitment.store(true, Ordering::SeqCst);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::RolledBack);

        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 100);
        assert_eq!(
            balance(&h.destination_ledger, DESTINATION_TOKEN, OWNER).await,
            0
        );
    }

    /// A burn-mint transfer that fails at commitment restores the burned
    /// unit on the source ledger.
    #[tokio::test]
    async fn test_burn_mint_compensation_restores_source() {
        let h = harness(TransferStrategy::BurnMint);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);
        h.counterparty.fail_commitment.store(true, Ordering::SeqCst);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::RolledBack);

        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 100);
    }

    /// Insufficient source balance reverts the lock; the session fails with
    /// no escrow to release.
    #[tokio::test]
    async fn test_insufficient_balance_fails_cleanly() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 10);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        let final_state = h.coordinator.execute(session_id).await.unwrap();
        assert_eq!(final_state, SessionState::Failed);

        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 10);
    }

    // ========================================================================
    // Idempotency Tests
    // ========================================================================

    /// Re-submitting a request for a completed session returns the same
    /// session and moves nothing.
    #[tokio::test]
    async fn test_resubmission_after_done_moves_nothing() {
        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);

        let first = h
            .coordinator
            .create(fungible_request(Some("ctx-42"), 100))
            .await
            .unwrap();
        assert_eq!(
            h.coordinator.execute(first).await.unwrap(),
            SessionState::Committed
        );

        let second = h
            .coordinator
            .create(fungible_request(Some("ctx-42"), 100))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            h.coordinator.execute(second).await.unwrap(),
            SessionState::Committed
        );

        // Exactly one movement happened.
        assert_eq!(
            balance(&h.destination_ledger, DESTINATION_TOKEN, OWNER).await,
            100
        );
        assert_eq!(balance(&h.source_ledger, SOURCE_TOKEN, OWNER).await, 0);
    }

    // ========================================================================
    // Admission Validation Tests
    // ========================================================================

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let h = harness(TransferStrategy::LockUnlock);
        let result = h.coordinator.create(fungible_request(None, 0)).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_same_network_rejected() {
        let h = harness(TransferStrategy::LockUnlock);
        let mut request = fungible_request(None, 100);
        request.destination_network = SOURCE.to_string();
        let result = h.coordinator.create(request).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_configuration_error() {
        let h = harness(TransferStrategy::LockUnlock);
        let mut request = fungible_request(None, 100);
        request.asset.asset_id = "UNKNOWN".to_string();
        let err = h.coordinator.create(request).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_unsupported_claim_format_is_configuration_error() {
        let h = harness(TransferStrategy::LockUnlock);
        let mut request = fungible_request(None, 100);
        request.claim_format = ClaimFormat::Receipt;
        let err = h.coordinator.create(request).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    /// Stage transitions land in the durable trail, per-stage and ordered.
    #[tokio::test]
    async fn test_stage_transitions_are_logged() {
        use crate::storage::{LogPhase, LogStore};

        let h = harness(TransferStrategy::LockUnlock);
        h.source_ledger.seed_balance(SOURCE_TOKEN, OWNER, 100);

        let session_id = h.coordinator.create(fungible_request(None, 100)).await.unwrap();
        h.coordinator.execute(session_id).await.unwrap();
        h.log.flush().await;

        let entries = h
            .log_store
            .entries_for(&session_id.to_string())
            .await
            .unwrap();

        for stage in 1..=3u8 {
            let tag = format!("transfer-stage{stage}");
            let phases: Vec<LogPhase> = entries
                .iter()
                .filter(|e| e.entry_type == tag)
                .map(|e| e.phase)
                .collect();
            assert_eq!(
                phases,
                vec![LogPhase::Init, LogPhase::Exec, LogPhase::Done],
                "stage {stage} phases out of order"
            );
        }
        // Finalization of the source escrow is logged too.
        assert!(entries.iter().any(|e| e.entry_type == "finalize"));
    }
}
