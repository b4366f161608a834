//! Proxy entities and their status projections.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::enode::Enode;
use crate::net::SharedPeer;

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// One configured proxy: its static identity plus the live connection, if any.
///
/// The internal enode is immutable once the entry is created; the peer handle
/// is the only liveness signal.
pub struct ProxyEntry {
    /// Enode for the internal, validator-facing network interface.
    internal: Enode,
    /// Enode advertised to the public network.
    external: Enode,
    /// Connected proxy peer; `None` while disconnected.
    peer: Option<SharedPeer>,
    /// Unix time of the last disconnect. Initially the time the proxy was
    /// added.
    disconnect_ts: u64,
}

impl ProxyEntry {
    pub(crate) fn new(internal: Enode, external: Enode, now: u64) -> Self {
        Self {
            internal,
            external,
            peer: None,
            disconnect_ts: now,
        }
    }

    /// The proxy's node id, taken from its internal enode.
    pub fn id(&self) -> B256 {
        self.internal.id()
    }

    /// The internal, validator-facing enode.
    pub fn internal_enode(&self) -> &Enode {
        &self.internal
    }

    /// The externally advertised enode.
    pub fn external_enode(&self) -> &Enode {
        &self.external
    }

    /// True while a live connection to this proxy exists.
    pub fn is_peered(&self) -> bool {
        self.peer.is_some()
    }

    /// The live connection handle, if any.
    pub fn peer(&self) -> Option<&SharedPeer> {
        self.peer.as_ref()
    }

    /// Unix time of the last disconnect.
    pub fn disconnect_ts(&self) -> u64 {
        self.disconnect_ts
    }

    pub(crate) fn attach_peer(&mut self, peer: SharedPeer) {
        self.peer = Some(peer);
    }

    pub(crate) fn detach_peer(&mut self, now: u64) {
        self.peer = None;
        self.disconnect_ts = now;
    }
}

impl fmt::Debug for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEntry")
            .field("internal", &self.internal)
            .field("external", &self.external)
            .field("is_peered", &self.is_peered())
            .field("disconnect_ts", &self.disconnect_ts)
            .finish()
    }
}

/// Read-only status projection of a proxy, suitable for RPC reporting.
///
/// Always derived from a [`ProxyEntry`] plus the assignment map, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInfo {
    /// Internal enode URL.
    #[serde(rename = "internalEnodeUrl")]
    pub internal_node: Enode,
    /// Externally advertised enode URL.
    #[serde(rename = "externalEnodeUrl")]
    pub external_node: Enode,
    /// True while the proxy is connected.
    #[serde(rename = "isPeered")]
    pub is_peered: bool,
    /// Validator addresses currently assigned to this proxy.
    #[serde(rename = "validators")]
    pub assigned_validators: Vec<Address>,
    /// Unix time of the proxy's last disconnect.
    #[serde(rename = "disconnectedTimestamp")]
    pub disconnect_ts: u64,
}

impl ProxyInfo {
    /// Projects a proxy entry and its assigned validators.
    pub fn new(entry: &ProxyEntry, assigned_validators: Vec<Address>) -> Self {
        Self {
            internal_node: entry.internal_enode().clone(),
            external_node: entry.external_enode().clone(),
            is_peered: entry.is_peered(),
            assigned_validators,
            disconnect_ts: entry.disconnect_ts(),
        }
    }
}

/// Status projection of the shielded validator, as seen from a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxiedValidatorInfo {
    /// The shielded validator's address.
    pub address: Address,
    /// True while the validator's connection to this proxy is up.
    #[serde(rename = "isPeered")]
    pub is_peered: bool,
    /// The validator's enode, where the transport knows it.
    #[serde(rename = "enodeURL")]
    pub node: Option<Enode>,
}
