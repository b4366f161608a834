//! Enode network descriptors.
//!
//! An enode identifies a devp2p node: a 64-byte uncompressed public key plus
//! the host and port it listens on, written as `enode://<128 hex>@host:port`.
//! The node id is the keccak256 hash of the public key.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{hex, keccak256, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProxyError;

/// A parsed enode URL.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Enode {
    /// 64-byte uncompressed secp256k1 public key.
    pubkey: [u8; 64],
    /// Host the node listens on (IP or DNS name).
    host: String,
    /// TCP listening port.
    port: u16,
}

impl Enode {
    /// Creates an enode from its parts.
    pub fn new(pubkey: [u8; 64], host: impl Into<String>, port: u16) -> Self {
        Self {
            pubkey,
            host: host.into(),
            port,
        }
    }

    /// Returns the node id: keccak256 of the public key.
    pub fn id(&self) -> B256 {
        keccak256(self.pubkey)
    }

    /// Returns the 64-byte public key.
    pub fn pubkey(&self) -> &[u8; 64] {
        &self.pubkey
    }

    /// Returns the host portion of the URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the canonical `enode://...` URL.
    pub fn url(&self) -> String {
        format!(
            "enode://{}@{}:{}",
            hex::encode(self.pubkey),
            self.host,
            self.port
        )
    }
}

impl fmt::Display for Enode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl fmt::Debug for Enode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enode")
            .field("id", &self.id())
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl FromStr for Enode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("enode://")
            .ok_or_else(|| ProxyError::InvalidEnode(format!("missing enode:// scheme: {s}")))?;

        let (key_part, addr_part) = rest
            .split_once('@')
            .ok_or_else(|| ProxyError::InvalidEnode(format!("missing @host:port: {s}")))?;

        let key_bytes = hex::decode(key_part)
            .map_err(|e| ProxyError::InvalidEnode(format!("bad public key hex: {e}")))?;
        let pubkey: [u8; 64] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProxyError::InvalidEnode("public key must be 64 bytes".into()))?;

        let (host, port_part) = addr_part
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::InvalidEnode(format!("missing port: {s}")))?;
        if host.is_empty() {
            return Err(ProxyError::InvalidEnode(format!("empty host: {s}")));
        }
        let port: u16 = port_part
            .parse()
            .map_err(|e| ProxyError::InvalidEnode(format!("bad port: {e}")))?;

        Ok(Self::new(pubkey, host, port))
    }
}

impl Serialize for Enode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.url())
    }
}

impl<'de> Deserialize<'de> for Enode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        url.parse().map_err(serde::de::Error::custom)
    }
}
