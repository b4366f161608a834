//! Node role configuration.
//!
//! A node runs exactly one of the two engines, selected at configuration
//! time; there is no runtime role switching.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// The role this node plays in the proxy topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRole {
    /// A public-facing relay shielding a validator.
    Proxy,
    /// A consensus validator hidden behind one or more proxies.
    ProxiedValidator,
}

/// Configuration shared by both engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The role this node is configured for.
    pub role: NodeRole,
    /// For a proxy: the address of the validator it shields.
    pub proxied_validator_address: Option<Address>,
}

impl EngineConfig {
    /// Configuration for a proxy node shielding the given validator.
    pub fn proxy(proxied_validator_address: Address) -> Self {
        Self {
            role: NodeRole::Proxy,
            proxied_validator_address: Some(proxied_validator_address),
        }
    }

    /// Configuration for a proxied validator node.
    pub fn proxied_validator() -> Self {
        Self {
            role: NodeRole::ProxiedValidator,
            proxied_validator_address: None,
        }
    }
}
