//! Gateway Identity & Counterparty Registry
//!
//! Static description of this gateway (id, supported protocol/crash versions,
//! connected ledgers, known counterparties), validated before any session
//! starts. Immutable after gateway start.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::leaf::LedgerKind;

/// Protocol / architecture / crash version triplet.
///
/// Two gateways may only open a session when all three components match on
/// the major version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTriplet {
    pub protocol: String,
    pub architecture: String,
    pub crash: String,
}

impl VersionTriplet {
    fn major(v: &str) -> &str {
        v.split('.').next().unwrap_or(v)
    }

    /// Major-version compatibility across all three components.
    pub fn compatible_with(&self, other: &VersionTriplet) -> bool {
        Self::major(&self.protocol) == Self::major(&other.protocol)
            && Self::major(&self.architecture) == Self::major(&other.architecture)
            && Self::major(&self.crash) == Self::major(&other.crash)
    }
}

impl Default for VersionTriplet {
    fn default() -> Self {
        Self {
            protocol: "2.0".to_string(),
            architecture: "1.0".to_string(),
            crash: "1.0".to_string(),
        }
    }
}

/// Descriptor of one ledger this gateway bridges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedLedger {
    pub network_id: String,
    pub ledger_kind: LedgerKind,
}

/// Static identity of a gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIdentity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: VersionTriplet,
    pub address: String,
    pub server_port: u16,
    pub client_port: u16,
    pub api_port: u16,
    #[serde(default)]
    pub connected_ledgers: Vec<ConnectedLedger>,
}

impl GatewayIdentity {
    pub fn supports_network(&self, network_id: &str) -> bool {
        self.connected_ledgers
            .iter()
            .any(|l| l.network_id == network_id)
    }
}

/// Known-counterparty registry.
///
/// Loaded once from configuration; the session coordinator consults it
/// before opening a session and again when the counterparty presents its
/// identity during stage 1.
pub struct GatewayRegistry {
    local: GatewayIdentity,
    counterparties: Vec<GatewayIdentity>,
}

impl GatewayRegistry {
    pub fn new(local: GatewayIdentity, counterparties: Vec<GatewayIdentity>) -> Self {
        Self {
            local,
            counterparties,
        }
    }

    pub fn local(&self) -> &GatewayIdentity {
        &self.local
    }

    pub fn counterparties(&self) -> &[GatewayIdentity] {
        &self.counterparties
    }

    pub fn find_counterparty(&self, id: &str) -> Option<&GatewayIdentity> {
        self.counterparties.iter().find(|c| c.id == id)
    }

    /// Validate a presented counterparty identity: membership plus version
    /// compatibility. Failures are protocol violations, not config errors:
    /// the peer spoke, and what it said is unacceptable.
    pub fn validate_counterparty(&self, presented: &GatewayIdentity) -> Result<(), GatewayError> {
        let known = self.find_counterparty(&presented.id).ok_or_else(|| {
            GatewayError::ProtocolViolation(format!(
                "unknown counterparty gateway: {}",
                presented.id
            ))
        })?;

        if !self.local.version.compatible_with(&presented.version) {
            return Err(GatewayError::ProtocolViolation(format!(
                "version mismatch with {}: local {:?}, presented {:?}",
                presented.id, self.local.version, presented.version
            )));
        }

        // The presented identity must still serve the networks we registered
        // it for; a silently shrunk ledger list invalidates routing.
        for ledger in &known.connected_ledgers {
            if !presented.supports_network(&ledger.network_id) {
                return Err(GatewayError::ProtocolViolation(format!(
                    "counterparty {} no longer serves network {}",
                    presented.id, ledger.network_id
                )));
            }
        }

        Ok(())
    }
}
