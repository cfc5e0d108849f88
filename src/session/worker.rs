//! Recovery Worker
//!
//! On startup, scans the Local store for sessions not in a terminal state
//! and diagnoses each from durable state: resume forward when the recorded
//! stage is consistent across both stores (and the ledger already reflects
//! its effect where that matters), flag for manual audit when resolution
//! cannot be determined automatically. Thereafter, periodically rescans for
//! stale sessions and steps them forward.
//!
//! Flagged sessions are excluded from auto-resume; they are never resolved
//! by last-writer-wins.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CrashRecoveryConfig;
use crate::error::GatewayError;
use crate::session::coordinator::SessionCoordinator;
use crate::session::state::SessionState;
use crate::session::types::SessionRecord;
use crate::storage::{LogEntry, LogPhase, LogWriter};

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale sessions
    pub scan_interval: Duration,
    /// How long a session must be untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum sessions to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&CrashRecoveryConfig> for WorkerConfig {
    fn from(config: &CrashRecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_threshold_secs),
            batch_size: config.batch_size,
        }
    }
}

enum Resolution {
    Resume,
    Flag(String),
}

pub struct RecoveryWorker {
    coordinator: Arc<SessionCoordinator>,
    config: WorkerConfig,
    log: LogWriter,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<SessionCoordinator>, config: WorkerConfig, log: LogWriter) -> Self {
        Self {
            coordinator,
            config,
            log,
        }
    }

    /// Run the recovery loop: one startup crash scan, then periodic stale
    /// scans forever.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting recovery worker"
        );

        if let Err(e) = self.startup_scan().await {
            error!(error = %e, "Startup crash scan failed");
        }

        loop {
            tokio::time::sleep(self.config.scan_interval).await;
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }
        }
    }

    /// Diagnose and resolve every non-terminal session after a restart.
    /// Returns (resumed, flagged) counts.
    pub async fn startup_scan(&self) -> Result<(usize, usize), GatewayError> {
        let pending = self.coordinator.local_store().find_non_terminal().await?;
        if pending.is_empty() {
            debug!("No sessions to recover");
            return Ok((0, 0));
        }

        info!(count = pending.len(), "Crash scan found open sessions");
        let mut resumed = 0;
        let mut flagged = 0;

        for record in pending {
            if record.recovery_flagged {
                flagged += 1;
                continue;
            }

            match self.diagnose(&record).await {
                Resolution::Resume => {
                    self.log
                        .log(
                            LogEntry::new(record.session_id.to_string(), "recovery", LogPhase::Init)
                                .with_metadata(serde_json::json!({
                                    "state": record.state.as_str(),
                                })),
                        )
                        .await;

                    match self.coordinator.execute(record.session_id).await {
                        Ok(final_state) => {
                            info!(
                                session_id = %record.session_id,
                                from = %record.state,
                                to = %final_state,
                                "Session resumed after restart"
                            );
                            self.log
                                .log(
                                    LogEntry::new(
                                        record.session_id.to_string(),
                                        "recovery",
                                        LogPhase::Done,
                                    )
                                    .with_metadata(serde_json::json!({
                                        "final_state": final_state.as_str(),
                                    })),
                                )
                                .await;
                            resumed += 1;
                        }
                        Err(e) => {
                            error!(
                                session_id = %record.session_id,
                                error = %e,
                                "Resume failed"
                            );
                            self.log
                                .log(
                                    LogEntry::new(
                                        record.session_id.to_string(),
                                        "recovery",
                                        LogPhase::Fail,
                                    )
                                    .with_metadata(serde_json::json!({ "error": e.to_string() })),
                                )
                                .await;
                        }
                    }
                }
                Resolution::Flag(reason) => {
                    warn!(
                        session_id = %record.session_id,
                        reason = %reason,
                        "Session flagged for manual audit"
                    );
                    self.coordinator
                        .local_store()
                        .set_recovery_flag(&record.session_id, true)
                        .await?;
                    self.log
                        .log(
                            LogEntry::new(record.session_id.to_string(), "recovery", LogPhase::Fail)
                                .with_metadata(serde_json::json!({
                                    "error": GatewayError::CrashRecovery(reason.clone()).to_string(),
                                    "code": "CRASH_RECOVERY_ERROR",
                                })),
                        )
                        .await;
                    flagged += 1;
                }
            }
        }

        info!(resumed, flagged, "Crash scan complete");
        Ok((resumed, flagged))
    }

    /// Decide whether a session can be driven forward automatically.
    async fn diagnose(&self, record: &SessionRecord) -> Resolution {
        // Cross-check against the counterparty-visible scope. A diverging or
        // missing Remote record means the two sides disagree about how far
        // the protocol got; never auto-resolve that.
        let remote = match self
            .coordinator
            .remote_store()
            .get(&record.session_id)
            .await
        {
            Ok(remote) => remote,
            Err(e) => return Resolution::Flag(format!("remote store unreachable: {e}")),
        };
        let remote = match remote {
            Some(remote) => remote,
            None => {
                return Resolution::Flag("session missing from remote scope".to_string());
            }
        };
        if remote.state != record.state {
            return Resolution::Flag(format!(
                "stage diverged: local {} vs remote {}",
                record.state, remote.state
            ));
        }

        match record.state {
            // The stage-2 leaf call may or may not have happened. With a
            // persisted proof the effect is known; without one, consult the
            // source escrow: empty means the lock never applied and stage 2
            // can be re-driven, anything else cannot be attributed safely.
            SessionState::LockPending if record.lock_proof.is_none() => {
                let leaf = match self.coordinator.leaves().leaf(&record.source_network) {
                    Ok(leaf) => leaf,
                    Err(e) => return Resolution::Flag(e.to_string()),
                };
                match leaf
                    .check_balance(
                        &record.source_binding.contract_address,
                        leaf.wrapper_address(),
                    )
                    .await
                {
                    Ok(0) => Resolution::Resume,
                    Ok(escrowed) => Resolution::Flag(format!(
                        "escrow holds {escrowed} units but no lock proof was persisted"
                    )),
                    Err(e) => Resolution::Flag(format!("escrow check failed: {e}")),
                }
            }
            // Everything else is safe to re-drive: proposals carry no asset
            // movement, a proven lock resumes at evidence exchange, and the
            // commitment request is idempotent on the counterparty side.
            _ => Resolution::Resume,
        }
    }

    /// Run a single stale-session scan, stepping each forward once.
    pub async fn scan_and_recover(&self) -> Result<usize, GatewayError> {
        let stale = self
            .coordinator
            .local_store()
            .find_stale(self.config.stale_threshold)
            .await?;

        if stale.is_empty() {
            debug!("No stale sessions found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale sessions to recover");
        let mut recovered = 0;

        for session in stale.iter().take(self.config.batch_size) {
            if session.recovery_flagged {
                continue;
            }

            debug!(
                session_id = %session.session_id,
                state = %session.state,
                retry_count = session.retry_count,
                "Recovering session"
            );

            match self.coordinator.step(session.session_id).await {
                Ok(new_state) => {
                    if new_state != session.state {
                        info!(
                            session_id = %session.session_id,
                            old_state = %session.state,
                            new_state = %new_state,
                            "Session state advanced"
                        );
                        recovered += 1;
                    }
                }
                Err(e) => {
                    error!(
                        session_id = %session.session_id,
                        error = %e,
                        "Failed to recover session"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered sessions this scan");
        }

        Ok(recovered)
    }
}
