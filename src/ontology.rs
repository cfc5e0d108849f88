//! Asset Ontology Registry
//!
//! Maps an abstract asset to its concrete per-ledger contract (name, address)
//! and to the movement strategy the transfer protocol must use for it.
//! Loaded once at gateway start from a JSON file, read-only thereafter.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Whether an asset is divisible (amount-based) or unique (token-id-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Fungible,
    Nonfungible,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Fungible => "FUNGIBLE",
            TokenType::Nonfungible => "NONFUNGIBLE",
        }
    }
}

/// How the asset moves between ledgers.
///
/// `LockUnlock` escrows on the source and mints a representation on the
/// destination, burning the escrow once the counterparty commits.
/// `BurnMint` destroys on the source up front and mints on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStrategy {
    LockUnlock,
    BurnMint,
}

/// Concrete contract binding of an asset on one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBinding {
    pub network_id: String,
    pub contract_name: String,
    pub contract_address: String,
}

/// Full ontology entry for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetOntology {
    pub asset_id: String,
    pub token_type: TokenType,
    pub strategy: TransferStrategy,
    pub bindings: Vec<AssetBinding>,
}

impl AssetOntology {
    pub fn binding(&self, network_id: &str) -> Option<&AssetBinding> {
        self.bindings.iter().find(|b| b.network_id == network_id)
    }
}

/// Read-only registry of all asset ontologies known to this gateway.
pub struct OntologyRegistry {
    assets: HashMap<String, AssetOntology>,
}

impl OntologyRegistry {
    pub fn from_assets(assets: Vec<AssetOntology>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|a| (a.asset_id.clone(), a))
                .collect(),
        }
    }

    /// Load from a JSON file: a top-level array of ontology entries.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("failed to read ontology {}: {e}", path.display()))
        })?;
        let assets: Vec<AssetOntology> = serde_json::from_str(&content).map_err(|e| {
            GatewayError::Configuration(format!("invalid ontology {}: {e}", path.display()))
        })?;
        Ok(Self::from_assets(assets))
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetOntology> {
        self.assets.get(asset_id)
    }

    /// Resolve the binding of an asset on a given network, or fail with the
    /// configuration error the admission path surfaces to the caller.
    pub fn resolve(
        &self,
        asset_id: &str,
        network_id: &str,
    ) -> Result<(&AssetOntology, &AssetBinding), GatewayError> {
        let ontology = self.get(asset_id).ok_or_else(|| {
            GatewayError::Configuration(format!("no ontology mapping for asset {asset_id}"))
        })?;
        let binding = ontology.binding(network_id).ok_or_else(|| {
            GatewayError::Configuration(format!(
                "asset {asset_id} has no binding on network {network_id}"
            ))
        })?;
        Ok((ontology, binding))
    }
}
