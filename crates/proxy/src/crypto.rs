//! Ed25519 signing and verification for enode certificates.
//!
//! Validators sign their certificates with an ed25519 key; verifiers hold a
//! registry mapping validator addresses to the corresponding verifying keys.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::messages::EnodeCertificate;
use crate::net::CertificateVerifier;

/// Maps validator addresses to their ed25519 verifying keys.
#[derive(Debug, Default, Clone)]
pub struct ValidatorKeyRegistry {
    keys: HashMap<Address, VerifyingKey>,
}

impl ValidatorKeyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the verifying key for a validator.
    pub fn insert(&mut self, address: Address, key: VerifyingKey) {
        self.keys.insert(address, key);
    }

    /// Returns the verifying key for a validator, if known.
    pub fn get(&self, address: &Address) -> Option<&VerifyingKey> {
        self.keys.get(address)
    }
}

impl CertificateVerifier for ValidatorKeyRegistry {
    fn verify(&self, address: Address, message: &[u8], signature: &[u8]) -> bool {
        let Some(key) = self.keys.get(&address) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }
}

/// Builds a signed enode certificate for the given validator.
pub fn sign_enode_certificate(
    signing_key: &SigningKey,
    address: Address,
    enode_url: impl Into<String>,
    version: u64,
) -> EnodeCertificate {
    let mut cert = EnodeCertificate {
        address,
        enode_url: enode_url.into(),
        version,
        signature: Bytes::new(),
    };
    let sig = signing_key.sign(&cert.signing_payload());
    cert.signature = Bytes::copy_from_slice(&sig.to_bytes());
    cert
}
