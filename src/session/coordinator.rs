//! Session Coordinator
//!
//! Orchestrates the 3-stage transfer protocol. This is the central component
//! that drives state transitions: validate and propose (stage 1), lock or
//! burn on the source leaf and exchange evidence (stage 2), obtain the
//! counterparty's commitment and finalize (stage 3).
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: every transition is written to the Local and
//!    Remote stores before the next stage's ledger call is issued.
//! 2. **Explicit Fail Rule**: a commitment request is only rolled back on an
//!    explicit failure; timeouts retry, because the request is idempotent
//!    and the destination may already have minted.
//! 3. **Per-Account Serialization**: leaf-mutating calls are serialized per
//!    (network, account); unrelated sessions run fully concurrently.
//! 4. **Idempotent Admission**: a request with a known context id returns
//!    the existing session, never a second asset movement.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::counterparty::{CounterpartyClient, ProposalDecision, TransferProposal};
use crate::error::GatewayError;
use crate::leaf::{BridgeManager, ContractCall, InvokeMode};
use crate::ontology::{OntologyRegistry, TransferStrategy};
use crate::registry::GatewayRegistry;
use crate::session::locks::AccountLocks;
use crate::session::state::SessionState;
use crate::session::types::{SessionId, SessionRecord, TransferRequest};
use crate::storage::{LogEntry, LogPhase, LogWriter, SessionStore};

pub struct SessionCoordinator {
    local: Arc<dyn SessionStore>,
    remote: Arc<dyn SessionStore>,
    leaves: Arc<BridgeManager>,
    ontology: Arc<OntologyRegistry>,
    registry: Arc<GatewayRegistry>,
    counterparty: Arc<dyn CounterpartyClient>,
    account_locks: Arc<AccountLocks>,
    log: LogWriter,
    config: SessionConfig,
}

impl SessionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: Arc<dyn SessionStore>,
        remote: Arc<dyn SessionStore>,
        leaves: Arc<BridgeManager>,
        ontology: Arc<OntologyRegistry>,
        registry: Arc<GatewayRegistry>,
        counterparty: Arc<dyn CounterpartyClient>,
        account_locks: Arc<AccountLocks>,
        log: LogWriter,
        config: SessionConfig,
    ) -> Self {
        Self {
            local,
            remote,
            leaves,
            ontology,
            registry,
            counterparty,
            account_locks,
            log,
            config,
        }
    }

    pub fn leaves(&self) -> &Arc<BridgeManager> {
        &self.leaves
    }

    pub fn local_store(&self) -> &Arc<dyn SessionStore> {
        &self.local
    }

    pub fn remote_store(&self) -> &Arc<dyn SessionStore> {
        &self.remote
    }

    /// Admit a transfer request and open a session.
    ///
    /// Configuration problems (missing ontology mapping, unsupported claim
    /// format, absent approve address) are surfaced here; no session is
    /// created for them.
    pub async fn create(&self, request: TransferRequest) -> Result<SessionId, GatewayError> {
        // Idempotent admission on the client context id.
        if let Some(ref context_id) = request.context_id
            && let Some(existing) = self.local.get_by_context(context_id).await?
        {
            info!(
                context_id = %context_id,
                session_id = %existing.session_id,
                "Duplicate context id, returning existing session"
            );
            return Ok(existing.session_id);
        }

        if request.source_network == request.destination_network {
            return Err(GatewayError::InvalidRequest(
                "source and destination network cannot be the same".to_string(),
            ));
        }
        if request.asset.amount() == Some(0) {
            return Err(GatewayError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }

        let source_leaf = self
            .leaves
            .leaf_for_claim(&request.source_network, request.claim_format)?;
        let destination_leaf = self
            .leaves
            .leaf_for_claim(&request.destination_network, request.claim_format)?;

        let (ontology, source_binding) = self
            .ontology
            .resolve(&request.asset.asset_id, &request.source_network)?;
        let (_, destination_binding) = self
            .ontology
            .resolve(&request.asset.asset_id, &request.destination_network)?;

        if ontology.token_type != request.asset.token_type() {
            return Err(GatewayError::Configuration(format!(
                "asset {} is registered as {} but the request carries {}",
                request.asset.asset_id,
                ontology.token_type.as_str(),
                request.asset.token_type().as_str()
            )));
        }

        // Approve-address handshake precondition: both sides must expose an
        // address that can be authorized. Absence is a configuration error,
        // not a protocol failure.
        let token_type = request.asset.token_type();
        if source_leaf.approve_address(token_type).await?.is_none() {
            return Err(GatewayError::Configuration(format!(
                "no approve address on source network {}",
                request.source_network
            )));
        }
        if destination_leaf.approve_address(token_type).await?.is_none() {
            return Err(GatewayError::Configuration(format!(
                "no approve address on destination network {}",
                request.destination_network
            )));
        }

        let session_id = SessionId::new();
        let record = SessionRecord::new(
            session_id,
            &request,
            ontology.strategy,
            source_binding.clone(),
            destination_binding.clone(),
        );

        self.local.upsert(&record).await?;
        self.remote.upsert(&record).await?;

        self.log_stage(
            &record,
            1,
            LogPhase::Init,
            serde_json::json!({
                "source": record.source_network,
                "destination": record.destination_network,
                "asset": record.asset.asset_id,
            }),
        )
        .await;

        info!(
            session_id = %session_id,
            "Session created: {} -> {}",
            record.source_network,
            record.destination_network
        );
        Ok(session_id)
    }

    /// Execute one step of the session FSM. Returns the new state.
    /// Call repeatedly until a terminal state is reached.
    pub async fn step(&self, session_id: SessionId) -> Result<SessionState, GatewayError> {
        let record = self
            .local
            .get(&session_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        if record.state.is_terminal() {
            return Ok(record.state);
        }
        if record.recovery_flagged {
            return Err(GatewayError::CrashRecovery(format!(
                "session {session_id} is flagged for manual audit"
            )));
        }

        let new_state = match record.state {
            SessionState::Proposing => self.step_proposing(&record).await?,
            SessionState::Proposed => self.step_proposed(&record).await?,
            SessionState::LockPending => self.step_lock_pending(&record).await?,
            SessionState::Locked => self.step_locked(&record).await?,
            SessionState::CommitPending => self.step_commit_pending(&record).await?,
            SessionState::RollingBack => self.step_rolling_back(&record).await?,
            _ => record.state,
        };

        if !new_state.is_terminal() && new_state == record.state {
            self.local.increment_retry(&session_id).await?;
        }

        Ok(new_state)
    }

    /// Execute the session to completion.
    pub async fn execute(&self, session_id: SessionId) -> Result<SessionState, GatewayError> {
        let mut state = SessionState::Proposing;

        for i in 0..self.config.max_steps {
            state = self.step(session_id).await?;

            if state.is_terminal() {
                info!(
                    session_id = %session_id,
                    state = %state,
                    iterations = i + 1,
                    "Session completed"
                );
                return Ok(state);
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        warn!(
            session_id = %session_id,
            state = %state,
            "Session did not complete within step limit"
        );
        Ok(state)
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Option<SessionRecord>, GatewayError> {
        self.local.get(&session_id).await
    }

    // ========================================================================
    // Stage transitions
    // ========================================================================

    /// Stage 1: identity exchange, compatibility check, proposal.
    async fn step_proposing(&self, record: &SessionRecord) -> Result<SessionState, GatewayError> {
        self.log_stage(record, 1, LogPhase::Exec, serde_json::Value::Null)
            .await;

        let presented = match self
            .with_stage_timeout(1, self.counterparty.exchange_identity(self.registry.local()))
            .await
        {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) | Err(e) => return self.fail(record, 1, e).await,
        };
        if let Err(e) = self.registry.validate_counterparty(&presented) {
            return self.fail(record, 1, e).await;
        }

        if record.counterparty_id.is_none() {
            let mut updated = record.clone();
            updated.counterparty_id = Some(presented.id.clone());
            self.local.upsert(&updated).await?;
        }

        let proposal = TransferProposal {
            session_id: record.session_id,
            context_id: record.context_id.clone(),
            source_network: record.source_network.clone(),
            destination_network: record.destination_network.clone(),
            asset: record.asset.clone(),
            claim_format: record.claim_format,
            sender: self.registry.local().clone(),
        };

        let decision = match self
            .with_stage_timeout(1, self.counterparty.propose_transfer(&proposal))
            .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) | Err(e) => return self.fail(record, 1, e).await,
        };

        match decision {
            ProposalDecision::Accepted => {
                let state = self
                    .advance(record, SessionState::Proposing, SessionState::Proposed)
                    .await?;
                if state == SessionState::Proposed {
                    self.log_stage(record, 1, LogPhase::Done, serde_json::Value::Null)
                        .await;
                }
                Ok(state)
            }
            ProposalDecision::Rejected { reason } => {
                self.fail(
                    record,
                    1,
                    GatewayError::ProtocolViolation(format!("proposal rejected: {reason}")),
                )
                .await
            }
        }
    }

    /// Stage 1 -> 2 boundary: persist before the first stage-2 ledger call.
    async fn step_proposed(&self, record: &SessionRecord) -> Result<SessionState, GatewayError> {
        let state = self
            .advance(record, SessionState::Proposed, SessionState::LockPending)
            .await?;
        if state == SessionState::LockPending {
            self.log_stage(record, 2, LogPhase::Init, serde_json::Value::Null)
                .await;
        }
        Ok(state)
    }

    /// Stage 2: allowance grant, lock (or burn) on the source leaf, evidence
    /// exchange with the counterparty.
    async fn step_lock_pending(
        &self,
        record: &SessionRecord,
    ) -> Result<SessionState, GatewayError> {
        let leaf = self.leaves.leaf(&record.source_network)?;
        let asset = &record.asset;

        let _guard = self
            .account_locks
            .acquire(&record.source_network, &asset.owner)
            .await;

        // Allowance grant on the approve address; required before any asset
        // movement through the wrapper.
        let approve_address = leaf
            .approve_address(asset.token_type())
            .await?
            .ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "no approve address on source network {}",
                    record.source_network
                ))
            })?;
        let approve = ContractCall {
            contract_name: record.source_binding.contract_name.clone(),
            contract_address: record.source_binding.contract_address.clone(),
            method: "approve".to_string(),
            params: vec![
                serde_json::json!(asset.owner),
                serde_json::json!(approve_address),
                asset.unit_value(),
            ],
        };
        match self
            .with_stage_timeout(2, leaf.invoke(&approve, InvokeMode::Send))
            .await
        {
            Ok(Ok(_)) => {}
            // Nothing escrowed yet; plain failure, no rollback needed.
            Ok(Err(e)) => return self.fail(record, 2, GatewayError::from(e)).await,
            Err(timeout) => return self.fail(record, 2, timeout).await,
        }

        self.log_stage(record, 2, LogPhase::Exec, serde_json::Value::Null)
            .await;

        let movement = async {
            match record.strategy {
                TransferStrategy::LockUnlock => leaf.lock(asset, &record.source_binding).await,
                TransferStrategy::BurnMint => leaf.burn(asset, &record.source_binding).await,
            }
        };
        let proof = match self.with_stage_timeout(2, movement).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(ledger_err)) => {
                // Explicit revert: the source asset never moved.
                return self.fail(record, 2, GatewayError::from(ledger_err)).await;
            }
            Err(timeout) => {
                // Outcome unknown: the unit may be escrowed. Take the
                // rollback path, which releases it if it is.
                return self.start_rollback(record, 2, timeout).await;
            }
        };

        self.local.record_proof(&record.session_id, &proof).await?;
        self.remote.record_proof(&record.session_id, &proof).await?;

        let verified = match self
            .with_stage_timeout(
                2,
                self.counterparty
                    .verify_lock_evidence(&record.session_id, &proof),
            )
            .await
        {
            Ok(Ok(verified)) => verified,
            Ok(Err(e)) | Err(e) => return self.start_rollback(record, 2, e).await,
        };

        if !verified {
            return self
                .start_rollback(
                    record,
                    2,
                    GatewayError::ProtocolViolation(
                        "counterparty rejected lock evidence".to_string(),
                    ),
                )
                .await;
        }

        let state = self
            .advance(record, SessionState::LockPending, SessionState::Locked)
            .await?;
        if state == SessionState::Locked {
            self.log_stage(
                record,
                2,
                LogPhase::Done,
                serde_json::json!({ "proof_digest": proof.digest() }),
            )
            .await;
        }
        Ok(state)
    }

    /// Stage 2 -> 3 boundary: persist before the commitment request.
    async fn step_locked(&self, record: &SessionRecord) -> Result<SessionState, GatewayError> {
        let state = self
            .advance(record, SessionState::Locked, SessionState::CommitPending)
            .await?;
        if state == SessionState::CommitPending {
            self.log_stage(record, 3, LogPhase::Init, serde_json::Value::Null)
                .await;
        }
        Ok(state)
    }

    /// Stage 3: counterparty commitment, source finalization.
    async fn step_commit_pending(
        &self,
        record: &SessionRecord,
    ) -> Result<SessionState, GatewayError> {
        self.log_stage(record, 3, LogPhase::Exec, serde_json::Value::Null)
            .await;

        let commitment = match self
            .with_stage_timeout(3, self.counterparty.request_commitment(&record.session_id))
            .await
        {
            Ok(Ok(commitment)) => commitment,
            Ok(Err(e @ GatewayError::LedgerInvocation(_))) => {
                // The destination leaf refused explicitly: safe to release
                // the source escrow.
                return self.start_rollback(record, 3, e).await;
            }
            Ok(Err(other)) | Err(other) => {
                // Unknown outcome (timeout, transport): the destination may
                // have minted. The commitment request is idempotent, so stay
                // and retry; never compensate on an unknown.
                warn!(
                    session_id = %record.session_id,
                    error = %other,
                    "Commitment request unresolved, staying in COMMIT_PENDING"
                );
                return Ok(SessionState::CommitPending);
            }
        };

        self.local
            .record_commitment(&record.session_id, &commitment)
            .await?;

        self.finalize_source(record).await;

        let state = self
            .advance(record, SessionState::CommitPending, SessionState::Committed)
            .await?;
        if state == SessionState::Committed {
            self.log_stage(
                record,
                3,
                LogPhase::Done,
                serde_json::json!({ "commitment_digest": commitment.digest() }),
            )
            .await;
            info!(session_id = %record.session_id, "Transfer committed");
        }
        Ok(state)
    }

    /// Release (or restore) the source asset after a failed transfer.
    /// Best-effort and logged regardless of outcome.
    async fn step_rolling_back(
        &self,
        record: &SessionRecord,
    ) -> Result<SessionState, GatewayError> {
        let leaf = self.leaves.leaf(&record.source_network)?;
        let asset = &record.asset;

        let _guard = self
            .account_locks
            .acquire(&record.source_network, &asset.owner)
            .await;

        let result = match record.strategy {
            TransferStrategy::LockUnlock => {
                // Only release what is actually escrowed; a rollback after a
                // lock timeout may find nothing moved.
                let escrowed = leaf
                    .check_balance(
                        &record.source_binding.contract_address,
                        leaf.wrapper_address(),
                    )
                    .await?;
                let holds_unit = match asset.amount() {
                    Some(amount) => escrowed >= amount,
                    None => escrowed > 0,
                };
                if holds_unit {
                    leaf.unlock(asset, &record.source_binding).await.map(Some)
                } else {
                    Ok(None)
                }
            }
            TransferStrategy::BurnMint => {
                // The source unit was destroyed up front; compensation
                // restores it.
                if record.lock_proof.is_some() {
                    leaf.mint(asset, &record.source_binding).await.map(Some)
                } else {
                    Ok(None)
                }
            }
        };

        match result {
            Ok(receipt) => {
                self.log
                    .log(
                        LogEntry::new(record.session_id.to_string(), "rollback", LogPhase::Done)
                            .with_metadata(serde_json::json!({
                                "released": receipt.is_some(),
                            })),
                    )
                    .await;
                let state = self
                    .advance(record, SessionState::RollingBack, SessionState::RolledBack)
                    .await?;
                info!(session_id = %record.session_id, "Session rolled back");
                Ok(state)
            }
            Err(e) => {
                self.log
                    .log(
                        LogEntry::new(record.session_id.to_string(), "rollback", LogPhase::Fail)
                            .with_metadata(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                warn!(
                    session_id = %record.session_id,
                    error = %e,
                    "Rollback failed (will retry)"
                );
                Ok(SessionState::RollingBack)
            }
        }
    }

    /// After the counterparty commits, permanently burn the escrowed source
    /// unit so the asset is never valid on both ledgers. Failure here is
    /// logged and alerts operations; the destination already holds the
    /// asset, so the session still commits.
    async fn finalize_source(&self, record: &SessionRecord) {
        if record.strategy == TransferStrategy::BurnMint {
            return; // already destroyed in stage 2
        }

        let leaf = match self.leaves.leaf(&record.source_network) {
            Ok(leaf) => leaf,
            Err(e) => {
                error!(session_id = %record.session_id, error = %e, "Finalize: no source leaf");
                return;
            }
        };

        let escrowed = record.asset.held_by(leaf.wrapper_address());
        let _guard = self
            .account_locks
            .acquire(&record.source_network, leaf.wrapper_address())
            .await;

        match leaf.burn(&escrowed, &record.source_binding).await {
            Ok(receipt) => {
                self.log
                    .log(
                        LogEntry::new(record.session_id.to_string(), "finalize", LogPhase::Done)
                            .with_metadata(serde_json::json!({ "tx_id": receipt.tx_id })),
                    )
                    .await;
            }
            Err(e) => {
                warn!(
                    session_id = %record.session_id,
                    error = %e,
                    "Source finalize failed (destination already committed)"
                );
                self.log
                    .log(
                        LogEntry::new(record.session_id.to_string(), "finalize", LogPhase::Fail)
                            .with_metadata(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// CAS the local store, then mirror the full record to the Remote scope.
    /// On a CAS miss another worker already transitioned the session; the
    /// current state is returned instead.
    async fn advance(
        &self,
        record: &SessionRecord,
        expected: SessionState,
        new: SessionState,
    ) -> Result<SessionState, GatewayError> {
        if !self
            .local
            .update_state_if(&record.session_id, expected, new)
            .await?
        {
            return match self.local.get(&record.session_id).await? {
                Some(r) => Ok(r.state),
                None => {
                    error!(
                        session_id = %record.session_id,
                        "Session not found after CAS failure"
                    );
                    Err(GatewayError::SessionNotFound(record.session_id.to_string()))
                }
            };
        }
        self.mirror_remote(&record.session_id).await?;
        Ok(new)
    }

    async fn mirror_remote(&self, session_id: &SessionId) -> Result<(), GatewayError> {
        if let Some(record) = self.local.get(session_id).await? {
            self.remote.upsert(&record).await?;
        }
        Ok(())
    }

    /// Terminal failure without rollback (nothing escrowed).
    async fn fail(
        &self,
        record: &SessionRecord,
        stage: u8,
        error: GatewayError,
    ) -> Result<SessionState, GatewayError> {
        warn!(
            session_id = %record.session_id,
            stage = stage,
            error = %error,
            "Session failed"
        );
        self.local
            .update_state_with_error(
                &record.session_id,
                record.state,
                SessionState::Failed,
                &error.to_string(),
            )
            .await?;
        self.mirror_remote(&record.session_id).await?;
        self.log_stage(
            record,
            stage,
            LogPhase::Fail,
            serde_json::json!({ "error": error.to_string(), "code": error.code() }),
        )
        .await;
        Ok(SessionState::Failed)
    }

    /// Route a stage failure into the rollback arm.
    async fn start_rollback(
        &self,
        record: &SessionRecord,
        stage: u8,
        error: GatewayError,
    ) -> Result<SessionState, GatewayError> {
        warn!(
            session_id = %record.session_id,
            stage = stage,
            error = %error,
            "Stage failed, rolling back"
        );
        self.local
            .update_state_with_error(
                &record.session_id,
                record.state,
                SessionState::RollingBack,
                &error.to_string(),
            )
            .await?;
        self.mirror_remote(&record.session_id).await?;
        self.log_stage(
            record,
            stage,
            LogPhase::Fail,
            serde_json::json!({ "error": error.to_string(), "code": error.code() }),
        )
        .await;
        Ok(SessionState::RollingBack)
    }

    async fn log_stage(
        &self,
        record: &SessionRecord,
        stage: u8,
        phase: LogPhase,
        metadata: serde_json::Value,
    ) {
        self.log
            .log(
                LogEntry::new(
                    record.session_id.to_string(),
                    format!("transfer-stage{stage}"),
                    phase,
                )
                .with_metadata(metadata),
            )
            .await;
    }

    async fn with_stage_timeout<T>(
        &self,
        stage: u8,
        fut: impl Future<Output = T>,
    ) -> Result<T, GatewayError> {
        let timeout_secs = self.config.stage_timeout_secs;
        tokio::time::timeout(Duration::from_secs(timeout_secs), fut)
            .await
            .map_err(|_| GatewayError::StageTimeout {
                stage,
                timeout_secs,
            })
    }
}
