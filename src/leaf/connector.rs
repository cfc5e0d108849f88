//! Ledger Connector Seam
//!
//! [`LedgerConnector`] is the contract consumed from concrete ledger SDKs:
//! submit a signed transaction, run a read-only query, subscribe to events.
//! Production deployments plug real chain clients in here.
//!
//! [`SimulatedLedger`] is an in-process connector with wrapper-contract
//! semantics (balances, escrow, allowances, a KV store, event emission).
//! It backs dev configurations and the test suite.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{EventFilter, LedgerError, LedgerEvent, TransactionReceipt};

/// A transaction as handed to a connector: contract key, method, args, and
/// the signing identity. The leaf has already translated its ledger's naming
/// conventions into this shape.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub contract: String,
    pub method: String,
    pub args: Vec<Value>,
    pub sender: String,
    /// Gas budget for ledgers that meter execution; `None` elsewhere.
    pub gas_limit: Option<u64>,
}

#[async_trait]
pub trait LedgerConnector: Send + Sync {
    fn network_id(&self) -> &str;

    /// Submit a state-changing transaction and wait for its receipt.
    async fn submit(&self, tx: &TransactionRequest) -> Result<TransactionReceipt, LedgerError>;

    /// Run a read-only query.
    async fn query(&self, tx: &TransactionRequest) -> Result<Value, LedgerError>;

    /// Subscribe to contract events matching the filter.
    async fn subscribe(
        &self,
        filter: &EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError>;
}

/// Capacity of each event subscription channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct ContractState {
    balances: HashMap<String, u64>,
    nft_owners: HashMap<String, String>,
    allowances: HashMap<(String, String), u64>,
    nft_approvals: HashMap<String, String>,
    kv: HashMap<String, Value>,
}

struct Subscriber {
    contract: String,
    signature: String,
    tx: mpsc::Sender<LedgerEvent>,
}

/// In-process ledger with wrapper-contract semantics.
///
/// Method names are dispatched case-insensitively so that both the EVM leaf
/// (`lock`) and the chaincode leaf (`Lock`) drive the same state machine.
pub struct SimulatedLedger {
    network_id: String,
    contracts: DashMap<String, ContractState>,
    subscribers: Mutex<Vec<Subscriber>>,
    height: AtomicU64,
}

impl SimulatedLedger {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            contracts: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            height: AtomicU64::new(1),
        }
    }

    /// Deterministic address derivation for dev accounts.
    pub fn derive_address(seed: &str) -> String {
        format!("0x{:x}", md5::compute(seed))
    }

    /// Credit a fungible balance directly (test/dev seeding).
    pub fn seed_balance(&self, contract: &str, account: &str, amount: u64) {
        let mut state = self.contracts.entry(contract.to_string()).or_default();
        *state.balances.entry(account.to_string()).or_insert(0) += amount;
    }

    /// Assign a non-fungible token directly (test/dev seeding).
    pub fn seed_nft(&self, contract: &str, token_id: &str, owner: &str) {
        let mut state = self.contracts.entry(contract.to_string()).or_default();
        state
            .nft_owners
            .insert(token_id.to_string(), owner.to_string());
    }

    fn next_receipt(&self, tx: &TransactionRequest) -> TransactionReceipt {
        let block = self.height.fetch_add(1, Ordering::SeqCst);
        TransactionReceipt {
            tx_id: format!("0x{:x}", uuid::Uuid::new_v4().simple()),
            network_id: self.network_id.clone(),
            block,
            method: tx.method.to_lowercase(),
            payload: serde_json::json!({
                "contract": tx.contract,
                "method": tx.method.to_lowercase(),
                "args": tx.args,
                "sender": tx.sender,
            }),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn revert(&self, method: &str, detail: impl Into<String>) -> LedgerError {
        LedgerError::Revert {
            network: self.network_id.clone(),
            method: method.to_string(),
            detail: detail.into(),
        }
    }

    fn arg_str<'a>(&self, method: &str, args: &'a [Value], i: usize) -> Result<&'a str, LedgerError> {
        args.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| self.revert(method, format!("missing string argument {i}")))
    }

    fn emit(&self, contract: &str, signature: &str, fields: Vec<String>, block: u64) {
        let event = LedgerEvent {
            network_id: self.network_id.clone(),
            contract: contract.to_string(),
            signature: signature.to_string(),
            fields,
            block,
        };

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| !s.tx.is_closed());
        for sub in subscribers.iter() {
            if sub.contract == contract && sub.signature == signature {
                if sub.tx.try_send(event.clone()).is_err() {
                    warn!(
                        network = %self.network_id,
                        contract = contract,
                        signature = signature,
                        "Event channel full, dropping event"
                    );
                }
            }
        }
    }

    fn event_signature(method: &str) -> Option<&'static str> {
        match method {
            "lock" => Some("Locked"),
            "unlock" => Some("Unlocked"),
            "mint" => Some("Minted"),
            "burn" => Some("Burned"),
            "approve" => Some("Approved"),
            "setvalue" => Some("ValueSet"),
            "publishvalue" => Some("ValuePublished"),
            _ => None,
        }
    }

    fn apply(&self, method: &str, tx: &TransactionRequest) -> Result<(), LedgerError> {
        let mut state = self.contracts.entry(tx.contract.clone()).or_default();
        let args = &tx.args;

        match method {
            // lock(owner, escrow, amount | token_id)
            "lock" => {
                let owner = self.arg_str(method, args, 0)?.to_string();
                let escrow = self.arg_str(method, args, 1)?.to_string();
                match args.get(2) {
                    Some(Value::Number(n)) => {
                        let amount = n.as_u64().ok_or_else(|| self.revert(method, "bad amount"))?;
                        let allowance = state
                            .allowances
                            .get(&(owner.clone(), escrow.clone()))
                            .copied()
                            .unwrap_or(0);
                        if allowance < amount {
                            return Err(self.revert(method, "insufficient allowance"));
                        }
                        let balance = state.balances.get(&owner).copied().unwrap_or(0);
                        if balance < amount {
                            return Err(self.revert(method, "insufficient balance"));
                        }
                        state
                            .allowances
                            .insert((owner.clone(), escrow.clone()), allowance - amount);
                        *state.balances.entry(owner).or_insert(0) -= amount;
                        *state.balances.entry(escrow).or_insert(0) += amount;
                    }
                    Some(Value::String(token_id)) => {
                        if state.nft_owners.get(token_id) != Some(&owner) {
                            return Err(self.revert(method, "token not owned by caller"));
                        }
                        if state.nft_approvals.get(token_id) != Some(&escrow) {
                            return Err(self.revert(method, "token not approved for escrow"));
                        }
                        state.nft_approvals.remove(token_id);
                        state.nft_owners.insert(token_id.clone(), escrow);
                    }
                    _ => return Err(self.revert(method, "missing unit argument")),
                }
            }
            // unlock(escrow, owner, amount | token_id)
            "unlock" => {
                let escrow = self.arg_str(method, args, 0)?.to_string();
                let owner = self.arg_str(method, args, 1)?.to_string();
                match args.get(2) {
                    Some(Value::Number(n)) => {
                        let amount = n.as_u64().ok_or_else(|| self.revert(method, "bad amount"))?;
                        let held = state.balances.get(&escrow).copied().unwrap_or(0);
                        if held < amount {
                            return Err(self.revert(method, "escrow underfunded"));
                        }
                        *state.balances.entry(escrow).or_insert(0) -= amount;
                        *state.balances.entry(owner).or_insert(0) += amount;
                    }
                    Some(Value::String(token_id)) => {
                        if state.nft_owners.get(token_id) != Some(&escrow) {
                            return Err(self.revert(method, "token not escrowed"));
                        }
                        state.nft_owners.insert(token_id.clone(), owner);
                    }
                    _ => return Err(self.revert(method, "missing unit argument")),
                }
            }
            // mint(owner, amount | token_id)
            "mint" => {
                let owner = self.arg_str(method, args, 0)?.to_string();
                match args.get(1) {
                    Some(Value::Number(n)) => {
                        let amount = n.as_u64().ok_or_else(|| self.revert(method, "bad amount"))?;
                        *state.balances.entry(owner).or_insert(0) += amount;
                    }
                    Some(Value::String(token_id)) => {
                        if state.nft_owners.contains_key(token_id) {
                            return Err(self.revert(method, "token already exists"));
                        }
                        state.nft_owners.insert(token_id.clone(), owner);
                    }
                    _ => return Err(self.revert(method, "missing unit argument")),
                }
            }
            // burn(account, amount | token_id)
            "burn" => {
                let account = self.arg_str(method, args, 0)?.to_string();
                match args.get(1) {
                    Some(Value::Number(n)) => {
                        let amount = n.as_u64().ok_or_else(|| self.revert(method, "bad amount"))?;
                        let held = state.balances.get(&account).copied().unwrap_or(0);
                        if held < amount {
                            return Err(self.revert(method, "insufficient balance to burn"));
                        }
                        *state.balances.entry(account).or_insert(0) -= amount;
                    }
                    Some(Value::String(token_id)) => {
                        if state.nft_owners.get(token_id) != Some(&account) {
                            return Err(self.revert(method, "token not held by account"));
                        }
                        state.nft_owners.remove(token_id);
                    }
                    _ => return Err(self.revert(method, "missing unit argument")),
                }
            }
            // approve(owner, spender, amount | token_id)
            "approve" => {
                let owner = self.arg_str(method, args, 0)?.to_string();
                let spender = self.arg_str(method, args, 1)?.to_string();
                match args.get(2) {
                    Some(Value::Number(n)) => {
                        let amount = n.as_u64().ok_or_else(|| self.revert(method, "bad amount"))?;
                        state.allowances.insert((owner, spender), amount);
                    }
                    Some(Value::String(token_id)) => {
                        state.nft_approvals.insert(token_id.clone(), spender);
                    }
                    _ => return Err(self.revert(method, "missing unit argument")),
                }
            }
            // setValue(key, value)
            "setvalue" => {
                let key = self.arg_str(method, args, 0)?.to_string();
                let value = args
                    .get(1)
                    .cloned()
                    .ok_or_else(|| self.revert(method, "missing value argument"))?;
                state.kv.insert(key, value);
            }
            // publishValue(value) - single-slot feed under the "latest" key
            "publishvalue" => {
                let value = args
                    .first()
                    .cloned()
                    .ok_or_else(|| self.revert(method, "missing value argument"))?;
                state.kv.insert("latest".to_string(), value);
            }
            _ => {
                return Err(self.revert(method, "method not found"));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LedgerConnector for SimulatedLedger {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    async fn submit(&self, tx: &TransactionRequest) -> Result<TransactionReceipt, LedgerError> {
        let method = tx.method.to_lowercase();
        self.apply(&method, tx)?;

        let receipt = self.next_receipt(tx);
        debug!(
            network = %self.network_id,
            contract = %tx.contract,
            method = %method,
            tx_id = %receipt.tx_id,
            "Transaction applied"
        );

        if let Some(signature) = Self::event_signature(&method) {
            let fields = tx
                .args
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            self.emit(&tx.contract, signature, fields, receipt.block);
        }

        Ok(receipt)
    }

    async fn query(&self, tx: &TransactionRequest) -> Result<Value, LedgerError> {
        let method = tx.method.to_lowercase();
        let state = self.contracts.entry(tx.contract.clone()).or_default();
        let args = &tx.args;

        match method.as_str() {
            // balanceOf(account): fungible units plus owned token count
            "balanceof" => {
                let account = self.arg_str(&method, args, 0)?;
                let fungible = state.balances.get(account).copied().unwrap_or(0);
                let tokens = state.nft_owners.values().filter(|o| *o == account).count() as u64;
                Ok(serde_json::json!(fungible + tokens))
            }
            "getvalue" => {
                let key = self.arg_str(&method, args, 0)?;
                Ok(state.kv.get(key).cloned().unwrap_or(Value::Null))
            }
            "allowance" => {
                let owner = self.arg_str(&method, args, 0)?.to_string();
                let spender = self.arg_str(&method, args, 1)?.to_string();
                let amount = state.allowances.get(&(owner, spender)).copied().unwrap_or(0);
                Ok(serde_json::json!(amount))
            }
            _ => Err(self.revert(&method, "method not found")),
        }
    }

    async fn subscribe(
        &self,
        filter: &EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers.lock().unwrap().push(Subscriber {
            contract: filter.contract.clone(),
            signature: filter.event_signature.clone(),
            tx,
        });
        debug!(
            network = %self.network_id,
            contract = %filter.contract,
            signature = %filter.event_signature,
            "Event subscription registered"
        );
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(contract: &str, method: &str, args: Vec<Value>) -> TransactionRequest {
        TransactionRequest {
            contract: contract.to_string(),
            method: method.to_string(),
            args,
            sender: "bridge".to_string(),
            gas_limit: None,
        }
    }

    #[tokio::test]
    async fn test_fungible_lock_requires_allowance() {
        let ledger = SimulatedLedger::new("besu-local");
        ledger.seed_balance("0xtoken", "alice", 100);

        let lock = tx(
            "0xtoken",
            "lock",
            vec![
                serde_json::json!("alice"),
                serde_json::json!("0xwrapper"),
                serde_json::json!(100),
            ],
        );
        assert!(ledger.submit(&lock).await.is_err());

        let approve = tx(
            "0xtoken",
            "approve",
            vec![
                serde_json::json!("alice"),
                serde_json::json!("0xwrapper"),
                serde_json::json!(100),
            ],
        );
        ledger.submit(&approve).await.unwrap();
        ledger.submit(&lock).await.unwrap();

        let balance = ledger
            .query(&tx("0xtoken", "balanceOf", vec![serde_json::json!("alice")]))
            .await
            .unwrap();
        assert_eq!(balance, serde_json::json!(0));

        let escrow = ledger
            .query(&tx(
                "0xtoken",
                "balanceOf",
                vec![serde_json::json!("0xwrapper")],
            ))
            .await
            .unwrap();
        assert_eq!(escrow, serde_json::json!(100));
    }

    #[tokio::test]
    async fn test_nft_lock_and_burn() {
        let ledger = SimulatedLedger::new("besu-local");
        ledger.seed_nft("0xdeed", "1001", "alice");

        ledger
            .submit(&tx(
                "0xdeed",
                "approve",
                vec![
                    serde_json::json!("alice"),
                    serde_json::json!("0xwrapper"),
                    serde_json::json!("1001"),
                ],
            ))
            .await
            .unwrap();
        ledger
            .submit(&tx(
                "0xdeed",
                "lock",
                vec![
                    serde_json::json!("alice"),
                    serde_json::json!("0xwrapper"),
                    serde_json::json!("1001"),
                ],
            ))
            .await
            .unwrap();
        ledger
            .submit(&tx(
                "0xdeed",
                "burn",
                vec![serde_json::json!("0xwrapper"), serde_json::json!("1001")],
            ))
            .await
            .unwrap();

        let alice = ledger
            .query(&tx("0xdeed", "balanceOf", vec![serde_json::json!("alice")]))
            .await
            .unwrap();
        assert_eq!(alice, serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_case_insensitive_dispatch() {
        let ledger = SimulatedLedger::new("fabric-local");
        ledger
            .submit(&tx(
                "cbdc-chaincode",
                "Mint",
                vec![serde_json::json!("bob"), serde_json::json!(50)],
            ))
            .await
            .unwrap();

        let balance = ledger
            .query(&tx(
                "cbdc-chaincode",
                "BalanceOf",
                vec![serde_json::json!("bob")],
            ))
            .await
            .unwrap();
        assert_eq!(balance, serde_json::json!(50));
    }

    #[tokio::test]
    async fn test_unknown_method_reverts() {
        let ledger = SimulatedLedger::new("besu-local");
        let err = ledger
            .submit(&tx("0xtoken", "nonexistentMethod", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Revert { .. }));
    }

    #[tokio::test]
    async fn test_event_emission_and_filtering() {
        let ledger = SimulatedLedger::new("besu-local");

        let mut rx = ledger
            .subscribe(&EventFilter {
                contract: "0xoracle".to_string(),
                event_signature: "ValueSet".to_string(),
                field_indexes: None,
            })
            .await
            .unwrap();

        // Matching write on a different contract must not be delivered.
        ledger
            .submit(&tx(
                "0xother",
                "setValue",
                vec![serde_json::json!("k"), serde_json::json!("v")],
            ))
            .await
            .unwrap();
        ledger
            .submit(&tx(
                "0xoracle",
                "setValue",
                vec![serde_json::json!("price"), serde_json::json!("42")],
            ))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.signature, "ValueSet");
        assert_eq!(event.fields, vec!["price".to_string(), "42".to_string()]);
        assert!(rx.try_recv().is_err());
    }
}
