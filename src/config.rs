//! Gateway Configuration
//!
//! Loaded once from `config/{env}.yaml` at gateway start, read-only
//! thereafter.

use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::leaf::{ClaimFormat, LedgerKind};
use crate::registry::GatewayIdentity;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayAppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub api: ApiConfig,
    pub identity: GatewayIdentity,
    #[serde(default)]
    pub counterparties: Vec<GatewayIdentity>,
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub stores: StoreConfig,
    #[serde(default)]
    pub crash_recovery: CrashRecoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub ontology_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Per-ledger leaf configuration. One per bridged ledger.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub network_id: String,
    pub ledger_kind: LedgerKind,
    /// Signing identity the leaf submits transactions under.
    pub signing_credential: String,
    pub wrapper_contract_name: String,
    pub wrapper_contract_address: String,
    /// Address that must be granted an allowance/role before assets move.
    /// Usually the wrapper itself; absent means transfers through this leaf
    /// are refused at admission.
    #[serde(default)]
    pub approve_address: Option<String>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_claim_formats")]
    pub claim_formats: Vec<ClaimFormat>,
    /// Connector-specific options, passed through opaquely.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_gas_limit() -> u64 {
    5_000_000
}

fn default_claim_formats() -> Vec<ClaimFormat> {
    vec![ClaimFormat::Default]
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// PostgreSQL connection URL for the Local store. When absent the
    /// gateway runs on in-memory stores (dev mode, no durability).
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Connection URL for the Remote (counterparty-shared) store. Absent in
    /// single-gateway deployments, where the Remote scope is in-process.
    #[serde(default)]
    pub remote_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrashRecoveryConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for CrashRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Per-stage timeout; expiry takes the rollback path.
    pub stage_timeout_secs: u64,
    /// Safety cap on coordinator step iterations per execute call.
    pub max_steps: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 60,
            max_steps: 100,
        }
    }
}

impl GatewayAppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
