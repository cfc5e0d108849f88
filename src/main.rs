//! crossgate - Cross-Ledger Asset Transfer Gateway
//!
//! Gateway bootstrap. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌─────────────┐    ┌──────────┐
//! │  Config  │───▶│  Leaves   │───▶│ Coordinator │───▶│   API    │
//! │  (YAML)  │    │ (bridges) │    │  + Oracle   │    │  (axum)  │
//! └──────────┘    └───────────┘    └─────────────┘    └──────────┘
//!                                        │
//!                                  ┌─────┴──────┐
//!                                  │ Local/Remote│
//!                                  │   stores    │
//!                                  └────────────┘
//! ```
//!
//! Every stage transition is persisted before the next ledger call; on
//! restart the recovery worker resumes or flags whatever was in flight.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crossgate::api::{self, AppState};
use crossgate::audit::StatusFacade;
use crossgate::config::GatewayAppConfig;
use crossgate::counterparty::LocalCounterparty;
use crossgate::leaf::{BridgeManager, LedgerConnector, SimulatedLedger};
use crossgate::logging::init_logging;
use crossgate::ontology::OntologyRegistry;
use crossgate::oracle::OracleManager;
use crossgate::registry::GatewayRegistry;
use crossgate::session::locks::AccountLocks;
use crossgate::session::{RecoveryWorker, SessionCoordinator, WorkerConfig};
use crossgate::storage::{
    self, LogStore, LogWriter, MemoryLogStore, MemorySessionStore, SessionStore,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = GatewayAppConfig::load(&env);
    let _log_guard = init_logging(&config);

    info!(
        gateway = %config.identity.id,
        env = %env,
        networks = config.networks.len(),
        "Starting gateway"
    );

    let ontology = Arc::new(
        OntologyRegistry::load_file(&config.ontology_path)
            .with_context(|| format!("loading ontology from {}", config.ontology_path))?,
    );

    // Concrete chain connectors are external; the in-process simulated
    // ledger backs every network in dev deployments.
    let leaves = Arc::new(BridgeManager::from_configs(&config.networks, |network| {
        Arc::new(SimulatedLedger::new(network.network_id.clone())) as Arc<dyn LedgerConnector>
    }));

    // Local store: Postgres when configured, in-memory otherwise (dev mode,
    // no durability across restarts).
    let (local_store, log_store): (Arc<dyn SessionStore>, Arc<dyn LogStore>) =
        match &config.stores.postgres_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(8)
                    .connect(url)
                    .await
                    .context("connecting to PostgreSQL")?;
                storage::postgres::init_schema(&pool)
                    .await
                    .context("initializing schema")?;
                info!("Using PostgreSQL stores");
                (
                    Arc::new(storage::PgSessionStore::new(pool.clone())),
                    Arc::new(storage::PgLogStore::new(pool)),
                )
            }
            None => {
                warn!("No postgres_url configured; sessions are not durable");
                (
                    Arc::new(MemorySessionStore::new()),
                    Arc::new(MemoryLogStore::new()),
                )
            }
        };

    // Remote scope: shared with the counterparty. In the single-gateway
    // deployment it lives in-process.
    let remote_store: Arc<dyn SessionStore> = match &config.stores.remote_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(4)
                .connect(url)
                .await
                .context("connecting to remote store")?;
            storage::postgres::init_schema(&pool).await?;
            Arc::new(storage::PgSessionStore::new(pool))
        }
        None => Arc::new(MemorySessionStore::new()),
    };

    let log_writer = LogWriter::spawn(log_store.clone());
    let account_locks = Arc::new(AccountLocks::new());
    let registry = Arc::new(GatewayRegistry::new(
        config.identity.clone(),
        config.counterparties.clone(),
    ));

    let counterparty = Arc::new(LocalCounterparty::new(
        config.identity.clone(),
        leaves.clone(),
        remote_store.clone(),
        account_locks.clone(),
    ));

    let coordinator = Arc::new(SessionCoordinator::new(
        local_store.clone(),
        remote_store,
        leaves.clone(),
        ontology,
        registry,
        counterparty.clone(),
        account_locks,
        log_writer.clone(),
        config.session.clone(),
    ));

    let oracle = Arc::new(OracleManager::new(
        leaves,
        log_writer.clone(),
        Duration::from_secs(config.session.stage_timeout_secs),
    ));

    if config.crash_recovery.enabled {
        let worker = RecoveryWorker::new(
            coordinator.clone(),
            WorkerConfig::from(&config.crash_recovery),
            log_writer.clone(),
        );
        tokio::spawn(async move { worker.run().await });
    } else {
        warn!("Crash recovery disabled by configuration");
    }

    let state = Arc::new(AppState {
        coordinator,
        oracle,
        facade: StatusFacade::new(local_store, log_store),
        counterparty_service: counterparty,
        identity: config.identity.clone(),
    });

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "Gateway API listening");

    axum::serve(listener, api::router(state))
        .await
        .context("serving API")?;

    Ok(())
}
