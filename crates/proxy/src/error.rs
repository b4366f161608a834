//! Error types for the validator proxy subsystem.

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Errors that can occur during proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A proxy with the same internal node id has already been added.
    #[error("proxy already added: {0}")]
    DuplicateProxy(B256),

    /// The given node id does not match any known proxy.
    #[error("unknown proxy: {0}")]
    UnknownProxy(B256),

    /// A peer connected that is not one of the configured proxies.
    #[error("connection from unauthorized peer: {0}")]
    UnauthorizedPeer(B256),

    /// A message arrived that was expected from the proxied validator but
    /// came from a different peer.
    #[error("message not sent by the proxied validator")]
    UnauthorizedMessage,

    /// An enode certificate failed validation.
    #[error("invalid enode certificate: {0}")]
    InvalidEnodeCertificate(String),

    /// An enode certificate carried a version older than the stored one.
    #[error("stale enode version for {address}: stored {stored}, received {received}")]
    StaleEnodeVersion {
        /// Validator address the certificate is for.
        address: Address,
        /// Version currently stored for that address.
        stored: u64,
        /// Version carried by the rejected certificate.
        received: u64,
    },

    /// No proxied validator connection is currently registered with this
    /// proxy.
    #[error("no proxied validator is registered")]
    NoProxiedValidatorPeer,

    /// The proxied validator engine has not been started.
    #[error("proxied validator engine is not running")]
    NotRunning,

    /// The proxied validator engine is already running.
    #[error("proxied validator engine is already running")]
    AlreadyStarted,

    /// The operation requires this node to be configured as a proxy.
    #[error("node is not configured as a proxy")]
    NotProxy,

    /// The operation requires this node to be configured as a proxied validator.
    #[error("node is not configured as a proxied validator")]
    NotProxiedValidator,

    /// RLP decoding of a wire message failed.
    #[error("decode error: {0}")]
    Decode(#[from] alloy_rlp::Error),

    /// A transport-level send failed.
    #[error("network error: {0}")]
    Network(String),

    /// An enode URL could not be parsed.
    #[error("invalid enode url: {0}")]
    InvalidEnode(String),

    /// The engine's command channel closed while a reply was pending.
    #[error("engine command channel closed")]
    ChannelClosed,
}
