//! Collaborator traits for the networking and signature layers.
//!
//! The transport (connection establishment, handshake, encryption) and the
//! signature scheme for consensus messages live outside this crate. These
//! traits are the seams the surrounding node implements.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};

use crate::enode::Enode;
use crate::error::ProxyError;

/// Handle to a live, authenticated peer connection.
///
/// Connect/disconnect callbacks hand these to the engines; the engines never
/// open or close connections themselves.
pub trait PeerHandle: Send + Sync {
    /// The node id of the remote peer, as established by the transport
    /// handshake.
    fn node_id(&self) -> B256;

    /// The remote peer's enode, where the transport knows it.
    fn remote_enode(&self) -> Option<Enode> {
        None
    }
}

/// Outbound message transmission.
pub trait MessageSender: Send + Sync + 'static {
    /// Sends a payload to a single connected peer under the given message
    /// code. One-way; no reply is expected at this layer.
    fn unicast(&self, peer: &dyn PeerHandle, payload: Bytes, code: u64) -> Result<(), ProxyError>;

    /// Broadcasts a payload to the peers currently mapped to the given
    /// validator addresses.
    fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: Bytes,
        code: u64,
        send_to_self: bool,
    ) -> Result<(), ProxyError>;
}

/// Verification of enode-certificate signatures.
pub trait CertificateVerifier: Send + Sync + 'static {
    /// Returns true if `signature` over `message` verifies against the key
    /// belonging to `address`.
    fn verify(&self, address: Address, message: &[u8], signature: &[u8]) -> bool;
}

/// A peer connection stored in engine state.
pub type SharedPeer = Arc<dyn PeerHandle>;
