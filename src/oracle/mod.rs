//! Oracle Relay Engine
//!
//! Architecturally parallel to the transfer engine but independent of it:
//! relays arbitrary read/write operations between ledgers, one-shot or
//! event-triggered, built only on the bridge leaf `invoke` surface.

pub mod listener;
pub mod manager;
pub mod types;

pub use manager::OracleManager;
pub use types::{
    ListeningOptions, OracleContract, OracleOperation, OracleOperationStatus, OracleOperationType,
    OracleTask, OracleTaskMode, OracleTaskRequest, OracleTaskStatus, OracleTaskType,
};
