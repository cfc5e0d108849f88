//! Chaincode Bridge Leaf
//!
//! Translates the uniform leaf surface into Fabric-style chaincode
//! invocations: contracts addressed by chaincode name, TitleCase function
//! names, string arguments, no gas metering.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::NetworkConfig;
use crate::ontology::{AssetBinding, TokenType};

use super::{
    Asset, BridgeLeaf, ClaimFormat, ContractCall, EventFilter, InvokeMode, InvokeOutcome,
    LedgerConnector, LedgerError, LedgerEvent, LedgerKind, TransactionRequest, TransactionReceipt,
};

pub struct FabricLeaf {
    config: NetworkConfig,
    connector: Arc<dyn LedgerConnector>,
}

impl FabricLeaf {
    pub fn new(config: NetworkConfig, connector: Arc<dyn LedgerConnector>) -> Self {
        Self { config, connector }
    }

    /// Chaincode arguments travel as strings on the wire; numbers keep their
    /// JSON form only for unit values, which the wrapper parses itself.
    fn request(&self, chaincode: &str, function: &str, args: Vec<Value>) -> TransactionRequest {
        TransactionRequest {
            contract: chaincode.to_string(),
            method: function.to_string(),
            args,
            sender: self.config.signing_credential.clone(),
            gas_limit: None,
        }
    }

    async fn submit_wrapper_op(
        &self,
        binding: &AssetBinding,
        function: &str,
        args: Vec<Value>,
    ) -> Result<TransactionReceipt, LedgerError> {
        let tx = self.request(&binding.contract_name, function, args);
        self.connector.submit(&tx).await
    }
}

#[async_trait]
impl BridgeLeaf for FabricLeaf {
    fn network_id(&self) -> &str {
        &self.config.network_id
    }

    fn ledger_kind(&self) -> LedgerKind {
        LedgerKind::Fabric
    }

    fn supported_claim_formats(&self) -> &[ClaimFormat] {
        &self.config.claim_formats
    }

    fn wrapper_address(&self) -> &str {
        &self.config.wrapper_contract_address
    }

    async fn lock(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.submit_wrapper_op(
            binding,
            "Lock",
            vec![
                json!(asset.owner),
                json!(self.wrapper_address()),
                asset.unit_value(),
            ],
        )
        .await
    }

    async fn unlock(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.submit_wrapper_op(
            binding,
            "Unlock",
            vec![
                json!(self.wrapper_address()),
                json!(asset.owner),
                asset.unit_value(),
            ],
        )
        .await
    }

    async fn mint(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.submit_wrapper_op(binding, "Mint", vec![json!(asset.owner), asset.unit_value()])
            .await
    }

    async fn burn(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.submit_wrapper_op(binding, "Burn", vec![json!(asset.owner), asset.unit_value()])
            .await
    }

    async fn approve_address(
        &self,
        _token_type: TokenType,
    ) -> Result<Option<String>, LedgerError> {
        Ok(self.config.approve_address.clone())
    }

    async fn check_balance(&self, contract: &str, account: &str) -> Result<u64, LedgerError> {
        let tx = self.request(contract, "BalanceOf", vec![json!(account)]);
        let value = self.connector.query(&tx).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    async fn invoke(
        &self,
        call: &ContractCall,
        mode: InvokeMode,
    ) -> Result<InvokeOutcome, LedgerError> {
        let tx = self.request(&call.contract_name, &call.method, call.params.clone());
        match mode {
            InvokeMode::Call => {
                let output = self.connector.query(&tx).await?;
                Ok(InvokeOutcome {
                    output,
                    receipt: None,
                })
            }
            InvokeMode::Send => {
                let receipt = self.connector.submit(&tx).await?;
                Ok(InvokeOutcome {
                    output: serde_json::json!(receipt.tx_id),
                    receipt: Some(receipt),
                })
            }
        }
    }

    async fn subscribe(
        &self,
        filter: &EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError> {
        self.connector.subscribe(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{AssetUnit, SimulatedLedger};

    fn leaf() -> (FabricLeaf, Arc<SimulatedLedger>) {
        let ledger = Arc::new(SimulatedLedger::new("fabric-local"));
        let config = NetworkConfig {
            network_id: "fabric-local".to_string(),
            ledger_kind: LedgerKind::Fabric,
            signing_credential: "bridge-msp-user".to_string(),
            wrapper_contract_name: "asset-wrapper".to_string(),
            wrapper_contract_address: "asset-wrapper".to_string(),
            approve_address: Some("asset-wrapper".to_string()),
            gas_limit: 0,
            claim_formats: vec![ClaimFormat::Default],
            options: Default::default(),
        };
        (FabricLeaf::new(config, ledger.clone()), ledger)
    }

    fn binding() -> AssetBinding {
        AssetBinding {
            network_id: "fabric-local".to_string(),
            contract_name: "cbdc-chaincode".to_string(),
            contract_address: "cbdc-chaincode".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mint_addresses_chaincode_by_name() {
        let (leaf, _ledger) = leaf();
        let asset = Asset {
            asset_id: "CBDC1".to_string(),
            owner: "bob".to_string(),
            unit: AssetUnit::Fungible { amount: 100 },
        };

        let receipt = leaf.mint(&asset, &binding()).await.unwrap();
        assert_eq!(receipt.network_id, "fabric-local");

        assert_eq!(
            leaf.check_balance("cbdc-chaincode", "bob").await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn test_nft_mint_and_burn() {
        let (leaf, _ledger) = leaf();
        let asset = Asset {
            asset_id: "NFT1".to_string(),
            owner: "bob".to_string(),
            unit: AssetUnit::Nonfungible {
                token_id: "1001".to_string(),
            },
        };

        leaf.mint(&asset, &binding()).await.unwrap();
        assert_eq!(
            leaf.check_balance("cbdc-chaincode", "bob").await.unwrap(),
            1
        );

        leaf.burn(&asset, &binding()).await.unwrap();
        assert_eq!(
            leaf.check_balance("cbdc-chaincode", "bob").await.unwrap(),
            0
        );
    }
}
