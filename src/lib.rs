//! crossgate - Cross-Ledger Asset Transfer Gateway
//!
//! A crash-recoverable gateway that moves fungible and non-fungible assets
//! between heterogeneous ledgers without a custodial third party, plus an
//! oracle engine relaying arbitrary read/write operations between them.
//!
//! # Modules
//!
//! - [`leaf`] - Bridge leaf abstraction and per-ledger adapters
//! - [`session`] - Transfer session engine (3-stage protocol, recovery)
//! - [`oracle`] - Oracle relay engine (one-shot and event-triggered)
//! - [`storage`] - Local/Remote session stores and the append-only log
//! - [`counterparty`] - Counterparty protocol client
//! - [`registry`] - Gateway identity and known-counterparty registry
//! - [`ontology`] - Asset-to-contract mapping per ledger
//! - [`audit`] - Read-only status and compliance export facade
//! - [`api`] - HTTP dispatcher
//! - [`config`] / [`logging`] - Gateway configuration and log setup

pub mod api;
pub mod audit;
pub mod config;
pub mod counterparty;
pub mod error;
pub mod leaf;
pub mod logging;
pub mod ontology;
pub mod oracle;
pub mod registry;
pub mod session;
pub mod storage;

// Convenient re-exports at crate root
pub use audit::StatusFacade;
pub use config::GatewayAppConfig;
pub use counterparty::{CounterpartyClient, HttpCounterparty, LocalCounterparty};
pub use error::GatewayError;
pub use leaf::{Asset, AssetUnit, BridgeLeaf, BridgeManager, ClaimFormat, LedgerKind, SimulatedLedger};
pub use ontology::{OntologyRegistry, TokenType, TransferStrategy};
pub use oracle::{OracleManager, OracleTaskMode, OracleTaskRequest, OracleTaskType};
pub use registry::{GatewayIdentity, GatewayRegistry, VersionTriplet};
pub use session::{
    AccountLocks, RecoveryWorker, SessionCoordinator, SessionId, SessionState, TransferRequest,
    WorkerConfig,
};
pub use storage::{LogEntry, LogPhase, LogWriter, MemoryLogStore, MemorySessionStore};
