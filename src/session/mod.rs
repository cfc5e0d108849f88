//! Transfer Session Engine
//!
//! One session per transfer request, driven through the 3-stage protocol:
//!
//! ```text
//! PROPOSING → PROPOSED → LOCK_PENDING → LOCKED → COMMIT_PENDING → COMMITTED
//!     ↓                       ↓            ↓           ↓
//!  FAILED                 FAILED       ROLLING_BACK → ROLLED_BACK
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: both stores are updated before the next
//!    stage's ledger call is issued
//! 2. **Explicit Fail Rule**: only roll back on an explicit failure, never
//!    on a timeout or unknown outcome once the commitment was requested
//! 3. **Idempotency**: admission dedupes on context id; the counterparty
//!    commitment is idempotent per session
//! 4. **Per-Account Serialization**: no two in-flight mutations for the same
//!    (network, account) pair

pub mod coordinator;
pub mod integration_tests;
pub mod locks;
pub mod state;
pub mod types;
pub mod worker;

// Re-exports for convenience
pub use coordinator::SessionCoordinator;
pub use locks::AccountLocks;
pub use state::SessionState;
pub use types::{SessionId, SessionRecord, SessionStatus, SubStatus, TransferRequest};
pub use worker::{RecoveryWorker, WorkerConfig};
