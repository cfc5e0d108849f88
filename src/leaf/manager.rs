//! Bridge Manager
//!
//! Builds one leaf per configured network and resolves leaves by network id
//! and claim format. The coordinator and the oracle engine only ever see the
//! [`BridgeLeaf`] trait; the ledger-kind dispatch lives here and nowhere
//! else.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::NetworkConfig;
use crate::error::GatewayError;

use super::{BridgeLeaf, ClaimFormat, EvmLeaf, FabricLeaf, LedgerConnector, LedgerKind};

pub struct BridgeManager {
    leaves: DashMap<String, Arc<dyn BridgeLeaf>>,
}

impl BridgeManager {
    pub fn new() -> Self {
        Self {
            leaves: DashMap::new(),
        }
    }

    /// Build a leaf for every network config, pairing each with its
    /// connector by network id.
    pub fn from_configs(
        configs: &[NetworkConfig],
        connector_for: impl Fn(&NetworkConfig) -> Arc<dyn LedgerConnector>,
    ) -> Self {
        let manager = Self::new();
        for config in configs {
            let connector = connector_for(config);
            manager.register(config.clone(), connector);
        }
        manager
    }

    pub fn register(&self, config: NetworkConfig, connector: Arc<dyn LedgerConnector>) {
        let network_id = config.network_id.clone();
        let leaf: Arc<dyn BridgeLeaf> = match config.ledger_kind {
            LedgerKind::Evm => Arc::new(EvmLeaf::new(config, connector)),
            LedgerKind::Fabric => Arc::new(FabricLeaf::new(config, connector)),
        };
        info!(
            network = %network_id,
            kind = leaf.ledger_kind().as_str(),
            "Bridge leaf registered"
        );
        self.leaves.insert(network_id, leaf);
    }

    pub fn network_ids(&self) -> Vec<String> {
        self.leaves.iter().map(|e| e.key().clone()).collect()
    }

    pub fn leaf(&self, network_id: &str) -> Result<Arc<dyn BridgeLeaf>, GatewayError> {
        self.leaves
            .get(network_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                GatewayError::Configuration(format!("no bridge leaf for network {network_id}"))
            })
    }

    /// Resolve a leaf that can produce the requested claim format.
    pub fn leaf_for_claim(
        &self,
        network_id: &str,
        claim_format: ClaimFormat,
    ) -> Result<Arc<dyn BridgeLeaf>, GatewayError> {
        let leaf = self.leaf(network_id)?;
        if !leaf.supported_claim_formats().contains(&claim_format) {
            return Err(GatewayError::Configuration(format!(
                "network {network_id} does not support claim format {claim_format:?}"
            )));
        }
        Ok(leaf)
    }
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::SimulatedLedger;

    fn config(network_id: &str, kind: LedgerKind, formats: Vec<ClaimFormat>) -> NetworkConfig {
        NetworkConfig {
            network_id: network_id.to_string(),
            ledger_kind: kind,
            signing_credential: "signer".to_string(),
            wrapper_contract_name: "wrapper".to_string(),
            wrapper_contract_address: "0xwrapper".to_string(),
            approve_address: Some("0xwrapper".to_string()),
            gas_limit: 1_000_000,
            claim_formats: formats,
            options: Default::default(),
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let configs = vec![
            config("besu-local", LedgerKind::Evm, vec![ClaimFormat::Default]),
            config("fabric-local", LedgerKind::Fabric, vec![ClaimFormat::Default]),
        ];
        let manager = BridgeManager::from_configs(&configs, |c| {
            Arc::new(SimulatedLedger::new(c.network_id.clone()))
        });

        assert_eq!(manager.network_ids().len(), 2);
        assert_eq!(
            manager.leaf("besu-local").unwrap().ledger_kind(),
            LedgerKind::Evm
        );
        assert_eq!(
            manager.leaf("fabric-local").unwrap().ledger_kind(),
            LedgerKind::Fabric
        );
        assert!(manager.leaf("unknown").is_err());
    }

    #[test]
    fn test_claim_format_resolution() {
        let configs = vec![config(
            "besu-local",
            LedgerKind::Evm,
            vec![ClaimFormat::Default],
        )];
        let manager = BridgeManager::from_configs(&configs, |c| {
            Arc::new(SimulatedLedger::new(c.network_id.clone()))
        });

        assert!(
            manager
                .leaf_for_claim("besu-local", ClaimFormat::Default)
                .is_ok()
        );
        let err = manager
            .leaf_for_claim("besu-local", ClaimFormat::Receipt)
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
