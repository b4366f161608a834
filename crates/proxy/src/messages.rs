//! Wire protocol messages exchanged between a proxied validator and its proxies.
//!
//! Messages are RLP-encoded. The forward envelope is never independently
//! signed: its authenticity comes from the authenticated proxy connection and
//! from the signature already embedded in the wrapped consensus message.

use alloy_primitives::{Address, Bytes};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

/// Message code for a forward envelope (proxied validator -> proxy).
pub const FORWARD_MSG: u64 = 0x11;

/// Message code for a validator enode share batch (proxied validator -> proxy).
pub const VAL_ENODES_SHARE_MSG: u64 = 0x12;

/// Message code for an enode certificate, used as the inner code of a forward
/// envelope when a certificate is propagated through proxies.
pub const ENODE_CERTIFICATE_MSG: u64 = 0x13;

/// Envelope wrapping an already-signed consensus message for relaying.
///
/// The proxy unwraps it and re-broadcasts `msg` under `code` to
/// `dest_addresses`, preserving the embedded signature byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ForwardMessage {
    /// Message code of the wrapped message.
    pub code: u64,
    /// Validator addresses the wrapped message is destined for.
    pub dest_addresses: Vec<Address>,
    /// The wrapped message bytes, signed by their original author.
    pub msg: Bytes,
}

/// One shared fact: "this validator is reachable at this enode, as of this
/// version." A higher version always supersedes a lower one.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct SharedValidatorEnode {
    /// The validator the enode belongs to.
    pub address: Address,
    /// The validator's enode URL.
    pub enode_url: String,
    /// Monotonically increasing version of this fact.
    pub version: u64,
}

/// A batch of shared validator enodes, sent so proxies learn how to reach the
/// validators assigned to them. Ordering within the batch carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ValEnodesShareMessage {
    /// The shared records; the receiver indexes them by address.
    pub val_enodes: Vec<SharedValidatorEnode>,
}

/// A signed assertion binding a validator address to its current enode.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct EnodeCertificate {
    /// The validator asserting its reachability.
    pub address: Address,
    /// The enode URL the validator claims to be reachable at.
    pub enode_url: String,
    /// Version of the assertion; stale versions are rejected.
    pub version: u64,
    /// Signature over [`Self::signing_payload`] by the claimed validator.
    pub signature: Bytes,
}

impl EnodeCertificate {
    /// Returns the bytes that the certificate signature covers: the RLP
    /// encoding of the unsigned fields.
    pub fn signing_payload(&self) -> Vec<u8> {
        #[derive(RlpEncodable)]
        struct UnsignedCertificate<'a> {
            address: &'a Address,
            enode_url: &'a str,
            version: u64,
        }

        let unsigned = UnsignedCertificate {
            address: &self.address,
            enode_url: &self.enode_url,
            version: self.version,
        };

        let mut buf = Vec::new();
        unsigned.encode(&mut buf);
        buf
    }
}

/// RLP-encodes a message into a payload ready for transmission.
pub fn encode_message<M: Encodable>(msg: &M) -> Bytes {
    let mut buf = Vec::new();
    msg.encode(&mut buf);
    buf.into()
}

/// Decodes a message from a received payload.
pub fn decode_message<M: Decodable>(payload: &[u8]) -> Result<M, alloy_rlp::Error> {
    M::decode(&mut &payload[..])
}
