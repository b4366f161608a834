//! Validator proxy subsystem for a BFT consensus node.
//!
//! A consensus validator can hide behind one or more public-facing relay
//! nodes ("proxies") so its own network address never reaches the wider
//! peer-to-peer network. This crate provides:
//!
//! - **Privacy**: consensus traffic leaves through proxies; the validator's
//!   enode is shared only with the proxies that serve it
//! - **Authenticated relaying**: a proxy re-broadcasts only messages that
//!   arrive over its one registered proxied-validator connection
//! - **Stable routing**: remote validator addresses are deterministically
//!   assigned to proxies and stay put across transient disconnects
//!
//! # Components
//!
//! - [`assignment`]: proxy set and validator-to-proxy assignment state
//! - [`handler`]: proxied-validator-side engine and its handler task
//! - [`proxy_engine`]: proxy-side engine (authenticate, unwrap, re-broadcast)
//! - [`messages`]: RLP wire messages (forward envelope, enode share batch,
//!   enode certificate)
//! - [`enode_table`]: monotonically versioned validator enode store
//! - [`net`]: collaborator traits implemented by the surrounding node
//!
//! The two engines are independent capability contracts: a node runs exactly
//! one of them, selected by [`config::NodeRole`] at configuration time.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod assignment;
pub mod config;
pub mod crypto;
pub mod enode;
pub mod enode_table;
pub mod error;
pub mod handler;
pub mod messages;
pub mod net;
pub mod proxy_engine;
pub mod types;

// Re-export commonly used items
pub use assignment::ProxySet;
pub use config::{EngineConfig, NodeRole};
pub use crypto::{sign_enode_certificate, ValidatorKeyRegistry};
pub use enode::Enode;
pub use enode_table::ValidatorEnodeTable;
pub use error::ProxyError;
pub use handler::ProxiedValidatorEngine;
pub use messages::{
    EnodeCertificate, ForwardMessage, SharedValidatorEnode, ValEnodesShareMessage,
    ENODE_CERTIFICATE_MSG, FORWARD_MSG, VAL_ENODES_SHARE_MSG,
};
pub use net::{CertificateVerifier, MessageSender, PeerHandle, SharedPeer};
pub use proxy_engine::{HandleOutcome, ProxyEngine};
pub use types::{ProxiedValidatorInfo, ProxyInfo};
