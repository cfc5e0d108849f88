//! Bridge Leaf
//!
//! Uniform capability surface over one connected ledger: lock, unlock, mint,
//! burn, approve-address lookup, balance check, and generic invoke. Each
//! ledger kind hides its own transaction model, signing credential, and
//! contract ABI behind this one interface.
//!
//! Leaves never retry: a failed call surfaces a [`LedgerError`] carrying the
//! ledger's native error, and retry policy stays with the session
//! coordinator.

pub mod connector;
pub mod evm;
pub mod fabric;
pub mod manager;

pub use connector::{LedgerConnector, SimulatedLedger, TransactionRequest};
pub use evm::EvmLeaf;
pub use fabric::FabricLeaf;
pub use manager::BridgeManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ontology::{AssetBinding, TokenType};

/// Closed set of supported ledger kinds. Adding a kind means implementing
/// [`BridgeLeaf`], never branching on ledger type inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Evm,
    Fabric,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Evm => "EVM",
            LedgerKind::Fabric => "FABRIC",
        }
    }
}

/// Proof/evidence encoding requested for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClaimFormat {
    /// Transaction id plus digest, the minimal evidence every leaf produces.
    #[default]
    Default,
    /// Full ledger-native receipt payload embedded in the proof.
    Receipt,
}

/// Read-only call vs. state-changing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeMode {
    Call,
    Send,
}

/// The asset being moved, as the protocol sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    pub owner: String,
    pub unit: AssetUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AssetUnit {
    Fungible { amount: u64 },
    Nonfungible { token_id: String },
}

impl Asset {
    pub fn token_type(&self) -> TokenType {
        match self.unit {
            AssetUnit::Fungible { .. } => TokenType::Fungible,
            AssetUnit::Nonfungible { .. } => TokenType::Nonfungible,
        }
    }

    pub fn amount(&self) -> Option<u64> {
        match &self.unit {
            AssetUnit::Fungible { amount } => Some(*amount),
            AssetUnit::Nonfungible { .. } => None,
        }
    }

    pub fn token_id(&self) -> Option<&str> {
        match &self.unit {
            AssetUnit::Fungible { .. } => None,
            AssetUnit::Nonfungible { token_id } => Some(token_id),
        }
    }

    /// The wire representation of the moved unit: amount as a JSON number,
    /// token id as a JSON string. Leaves rely on this distinction.
    pub fn unit_value(&self) -> serde_json::Value {
        match &self.unit {
            AssetUnit::Fungible { amount } => serde_json::json!(amount),
            AssetUnit::Nonfungible { token_id } => serde_json::json!(token_id),
        }
    }

    /// View of the same asset as held by a different account (used when the
    /// escrowed unit is finalized out of the wrapper).
    pub fn held_by(&self, account: &str) -> Asset {
        Asset {
            asset_id: self.asset_id.clone(),
            owner: account.to_string(),
            unit: self.unit.clone(),
        }
    }
}

/// Ledger-native receipt, usable as cryptographic evidence of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_id: String,
    pub network_id: String,
    pub block: u64,
    pub method: String,
    pub payload: serde_json::Value,
    pub timestamp_ms: i64,
}

impl TransactionReceipt {
    /// Stable digest over the receipt body, embedded in exchanged proofs.
    pub fn digest(&self) -> String {
        let body = format!(
            "{}:{}:{}:{}",
            self.tx_id, self.network_id, self.block, self.payload
        );
        hex::encode(md5::compute(body).0)
    }
}

/// A generic contract call, for `invoke` and the oracle relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCall {
    pub contract_name: String,
    pub contract_address: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// Result of an `invoke`: the output for reads, the receipt for writes.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub output: serde_json::Value,
    pub receipt: Option<TransactionReceipt>,
}

/// Ledger event subscription parameters: which contract, which event, and
/// which positional fields to extract from matching events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    pub contract: String,
    pub event_signature: String,
    #[serde(default)]
    pub field_indexes: Option<Vec<usize>>,
}

/// One matched ledger event, delivered over a subscription channel.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub network_id: String,
    pub contract: String,
    pub signature: String,
    pub fields: Vec<String>,
    pub block: u64,
}

impl LedgerEvent {
    /// Apply a filter's field selection to this event's payload.
    pub fn select_fields(&self, filter: &EventFilter) -> Vec<String> {
        match &filter.field_indexes {
            None => self.fields.clone(),
            Some(indexes) => indexes
                .iter()
                .filter_map(|i| self.fields.get(*i).cloned())
                .collect(),
        }
    }
}

/// Native failure of a leaf call.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("[{network}] connection error: {detail}")]
    Connection { network: String, detail: String },

    #[error("[{network}] transaction reverted in {method}: {detail}")]
    Revert {
        network: String,
        method: String,
        detail: String,
    },

    #[error("[{network}] subscription failed: {detail}")]
    Subscription { network: String, detail: String },

    #[error("[{network}] operation not supported: {detail}")]
    Unsupported { network: String, detail: String },
}

impl LedgerError {
    pub fn network(&self) -> &str {
        match self {
            LedgerError::Connection { network, .. }
            | LedgerError::Revert { network, .. }
            | LedgerError::Subscription { network, .. }
            | LedgerError::Unsupported { network, .. } => network,
        }
    }
}

/// Per-ledger bridge adapter.
///
/// Every operation is synchronous-to-the-caller but may block on ledger
/// confirmation; every mutating operation returns a receipt usable as
/// evidence.
#[async_trait]
pub trait BridgeLeaf: Send + Sync {
    fn network_id(&self) -> &str;

    fn ledger_kind(&self) -> LedgerKind;

    fn supported_claim_formats(&self) -> &[ClaimFormat];

    /// The wrapper/escrow address assets are locked into on this ledger.
    fn wrapper_address(&self) -> &str;

    /// Escrow the asset into the wrapper.
    async fn lock(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Release an escrowed asset back to its owner.
    async fn unlock(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Create the asset representation for the owner.
    async fn mint(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Destroy the asset unit held by `asset.owner`.
    async fn burn(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// The address that must be authorized before assets move through this
    /// leaf, if one is configured for the token type.
    async fn approve_address(
        &self,
        token_type: TokenType,
    ) -> Result<Option<String>, LedgerError>;

    async fn check_balance(&self, contract: &str, account: &str) -> Result<u64, LedgerError>;

    /// Generic read/write entry point; the oracle engine is built on this
    /// alone.
    async fn invoke(
        &self,
        call: &ContractCall,
        mode: InvokeMode,
    ) -> Result<InvokeOutcome, LedgerError>;

    /// Register an event subscription; matched events arrive on the returned
    /// bounded channel until the subscription is dropped.
    async fn subscribe(
        &self,
        filter: &EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fungible(amount: u64) -> Asset {
        Asset {
            asset_id: "CBDC1".to_string(),
            owner: "0xowner".to_string(),
            unit: AssetUnit::Fungible { amount },
        }
    }

    #[test]
    fn test_asset_unit_value() {
        assert_eq!(fungible(100).unit_value(), serde_json::json!(100));

        let nft = Asset {
            asset_id: "NFT1".to_string(),
            owner: "0xowner".to_string(),
            unit: AssetUnit::Nonfungible {
                token_id: "1001".to_string(),
            },
        };
        assert_eq!(nft.unit_value(), serde_json::json!("1001"));
        assert_eq!(nft.token_type(), TokenType::Nonfungible);
        assert_eq!(nft.token_id(), Some("1001"));
        assert_eq!(nft.amount(), None);
    }

    #[test]
    fn test_receipt_digest_is_stable() {
        let receipt = TransactionReceipt {
            tx_id: "0xabc".to_string(),
            network_id: "besu-local".to_string(),
            block: 7,
            method: "lock".to_string(),
            payload: serde_json::json!({"a": 1}),
            timestamp_ms: 0,
        };
        assert_eq!(receipt.digest(), receipt.clone().digest());
    }

    #[test]
    fn test_event_field_selection() {
        let event = LedgerEvent {
            network_id: "besu-local".to_string(),
            contract: "0xc".to_string(),
            signature: "ValueSet".to_string(),
            fields: vec!["k".to_string(), "v".to_string(), "extra".to_string()],
            block: 1,
        };

        let all = EventFilter {
            contract: "0xc".to_string(),
            event_signature: "ValueSet".to_string(),
            field_indexes: None,
        };
        assert_eq!(event.select_fields(&all).len(), 3);

        let some = EventFilter {
            field_indexes: Some(vec![1]),
            ..all
        };
        assert_eq!(event.select_fields(&some), vec!["v".to_string()]);
    }
}
