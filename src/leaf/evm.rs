//! EVM Bridge Leaf
//!
//! Translates the uniform leaf surface into EVM-style transactions:
//! contracts addressed by address, camelCase ABI methods, gas-metered sends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::ontology::{AssetBinding, TokenType};

use super::{
    Asset, BridgeLeaf, ClaimFormat, ContractCall, EventFilter, InvokeMode, InvokeOutcome,
    LedgerConnector, LedgerError, LedgerEvent, LedgerKind, TransactionRequest, TransactionReceipt,
};

pub struct EvmLeaf {
    config: NetworkConfig,
    connector: Arc<dyn LedgerConnector>,
}

impl EvmLeaf {
    pub fn new(config: NetworkConfig, connector: Arc<dyn LedgerConnector>) -> Self {
        Self { config, connector }
    }

    fn request(&self, contract: &str, method: &str, args: Vec<serde_json::Value>) -> TransactionRequest {
        TransactionRequest {
            contract: contract.to_string(),
            method: method.to_string(),
            args,
            sender: self.config.signing_credential.clone(),
            gas_limit: Some(self.config.gas_limit),
        }
    }

    async fn submit_wrapper_op(
        &self,
        binding: &AssetBinding,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<TransactionReceipt, LedgerError> {
        let tx = self.request(&binding.contract_address, method, args);
        let receipt = self.connector.submit(&tx).await?;
        debug!(
            network = %self.config.network_id,
            contract = %binding.contract_address,
            method = method,
            tx_id = %receipt.tx_id,
            "Wrapper operation confirmed"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl BridgeLeaf for EvmLeaf {
    fn network_id(&self) -> &str {
        &self.config.network_id
    }

    fn ledger_kind(&self) -> LedgerKind {
        LedgerKind::Evm
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
            "lock",
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
            "unlock",
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
        self.submit_wrapper_op(binding, "mint", vec![json!(asset.owner), asset.unit_value()])
            .await
    }

    async fn burn(
        &self,
        asset: &Asset,
        binding: &AssetBinding,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.submit_wrapper_op(binding, "burn", vec![json!(asset.owner), asset.unit_value()])
            .await
    }

    async fn approve_address(
        &self,
        _token_type: TokenType,
    ) -> Result<Option<String>, LedgerError> {
        Ok(self.config.approve_address.clone())
    }

    async fn check_balance(&self, contract: &str, account: &str) -> Result<u64, LedgerError> {
        let tx = self.request(contract, "balanceOf", vec![json!(account)]);
        let value = self.connector.query(&tx).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    async fn invoke(
        &self,
        call: &ContractCall,
        mode: InvokeMode,
    ) -> Result<InvokeOutcome, LedgerError> {
        let tx = self.request(&call.contract_address, &call.method, call.params.clone());
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
