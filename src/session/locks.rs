//! Per-Account Mutation Locks
//!
//! A given (network, account) pair must never be the subject of two
//! concurrently in-flight lock/mint/burn/unlock calls from this gateway.
//! Reads are unrestricted. Sessions hold no process-wide lock; only the
//! keyed mutex for the account they are about to mutate.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for (network, account). The guard is owned
    /// so it can be held across await points inside one leaf call.
    pub async fn acquire(&self, network: &str, account: &str) -> OwnedMutexGuard<()> {
        let key = (network.to_string(), account.to_string());
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
