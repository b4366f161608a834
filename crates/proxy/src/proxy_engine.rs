//! Proxy-side engine.
//!
//! A proxy serves exactly one proxied validator at a time. Inbound subsystem
//! messages are accepted only from that validator's authenticated connection;
//! everything else is left for other handlers. Valid forward envelopes are
//! unwrapped and re-broadcast to their destination addresses without
//! re-signing.

use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::RwLock;

use crate::config::{EngineConfig, NodeRole};
use crate::enode_table::ValidatorEnodeTable;
use crate::error::ProxyError;
use crate::messages::{
    decode_message, encode_message, EnodeCertificate, ForwardMessage, ValEnodesShareMessage,
    ENODE_CERTIFICATE_MSG, FORWARD_MSG, VAL_ENODES_SHARE_MSG,
};
use crate::net::{CertificateVerifier, MessageSender, PeerHandle, SharedPeer};
use crate::types::ProxiedValidatorInfo;

/// Result of offering a message to the engine.
///
/// `NotMine` lets the caller's dispatch loop try other handlers; `Failed`
/// means the message was this engine's to handle but was invalid, so it must
/// not be reprocessed elsewhere.
#[derive(Debug)]
pub enum HandleOutcome {
    /// Not a message this engine handles, or not from the authenticated
    /// proxied validator.
    NotMine,
    /// Handled successfully.
    Handled,
    /// This engine's message, but processing failed.
    Failed(ProxyError),
}

impl HandleOutcome {
    /// True for `Handled` and `Failed`: the dispatch loop must stop here.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::NotMine)
    }
}

/// The relay-side actor running on a proxy node.
pub struct ProxyEngine<S, V> {
    proxied_validator_address: Address,
    sender: Arc<S>,
    verifier: Arc<V>,
    enode_table: Arc<ValidatorEnodeTable>,
    /// The one registered proxied-validator connection, if any.
    proxied_validator: RwLock<Option<SharedPeer>>,
}

impl<S, V> ProxyEngine<S, V>
where
    S: MessageSender,
    V: CertificateVerifier,
{
    /// Creates the engine. Fails with `NotProxy` unless the node is
    /// configured as a proxy.
    pub fn new(
        config: &EngineConfig,
        sender: Arc<S>,
        verifier: Arc<V>,
        enode_table: Arc<ValidatorEnodeTable>,
    ) -> Result<Self, ProxyError> {
        let proxied_validator_address = match (config.role, config.proxied_validator_address) {
            (NodeRole::Proxy, Some(address)) => address,
            _ => return Err(ProxyError::NotProxy),
        };
        Ok(Self {
            proxied_validator_address,
            sender,
            verifier,
            enode_table,
            proxied_validator: RwLock::new(None),
        })
    }

    /// Registers the proxied validator's connection. A second registration
    /// replaces the first; registrations never stack.
    pub fn register_proxied_validator(&self, peer: SharedPeer) {
        let mut registered = self.proxied_validator.write();
        if let Some(current) = registered.as_ref() {
            tracing::info!(
                old = %current.node_id(),
                new = %peer.node_id(),
                "Replacing registered proxied validator peer"
            );
        }
        *registered = Some(peer);
    }

    /// Clears the registration if `peer` is the currently registered
    /// connection; otherwise a no-op.
    pub fn unregister_proxied_validator(&self, peer: &dyn PeerHandle) {
        let mut registered = self.proxied_validator.write();
        if registered
            .as_ref()
            .is_some_and(|current| current.node_id() == peer.node_id())
        {
            *registered = None;
        }
    }

    /// Sends an enode certificate up to the registered proxied validator.
    ///
    /// Used when this proxy's externally advertised enode changes and the
    /// shielded validator must learn the new certificate. Fails with
    /// `NoProxiedValidatorPeer` while no validator connection is registered.
    pub fn send_enode_certificate_to_proxied_validator(
        &self,
        cert: &EnodeCertificate,
    ) -> Result<(), ProxyError> {
        let peer = self
            .proxied_validator
            .read()
            .clone()
            .ok_or(ProxyError::NoProxiedValidatorPeer)?;
        tracing::debug!(
            peer = %peer.node_id(),
            address = %cert.address,
            version = cert.version,
            "Sending enode certificate to proxied validator"
        );
        self.sender
            .unicast(peer.as_ref(), encode_message(cert), ENODE_CERTIFICATE_MSG)
    }

    /// Status projection of the shielded validator as seen from this proxy.
    pub fn proxied_validator_info(&self) -> ProxiedValidatorInfo {
        let registered = self.proxied_validator.read();
        ProxiedValidatorInfo {
            address: self.proxied_validator_address,
            is_peered: registered.is_some(),
            node: registered.as_ref().and_then(|peer| peer.remote_enode()),
        }
    }

    /// Dispatches one inbound subsystem message.
    pub fn handle_message(&self, peer: &dyn PeerHandle, code: u64, payload: &[u8]) -> HandleOutcome {
        match code {
            FORWARD_MSG => self.handle_forward_msg(peer, payload),
            VAL_ENODES_SHARE_MSG => self.handle_val_enodes_share(peer, payload),
            _ => HandleOutcome::NotMine,
        }
    }

    fn is_from_proxied_validator(&self, peer: &dyn PeerHandle) -> bool {
        self.proxied_validator
            .read()
            .as_ref()
            .is_some_and(|current| current.node_id() == peer.node_id())
    }

    /// Receive path of the forward protocol: authenticate, unwrap,
    /// re-broadcast.
    fn handle_forward_msg(&self, peer: &dyn PeerHandle, payload: &[u8]) -> HandleOutcome {
        if !self.is_from_proxied_validator(peer) {
            tracing::warn!(
                from = %peer.node_id(),
                "Ignoring forward message from a peer that is not the proxied validator"
            );
            return HandleOutcome::NotMine;
        }

        let forward: ForwardMessage = match decode_message(payload) {
            Ok(forward) => forward,
            Err(e) => {
                tracing::error!(from = %peer.node_id(), error = %e, "Failed to decode forward message");
                return HandleOutcome::Failed(e.into());
            }
        };

        if forward.code == ENODE_CERTIFICATE_MSG {
            if let Err(e) = self.validate_enode_certificate(&forward.msg) {
                tracing::error!(from = %peer.node_id(), error = %e, "Rejecting forwarded enode certificate");
                return HandleOutcome::Failed(e);
            }
        }

        tracing::debug!(
            code = forward.code,
            destinations = forward.dest_addresses.len(),
            "Re-broadcasting forwarded message"
        );
        // The wrapped message keeps its original signature; it is multicast
        // exactly as received.
        if let Err(e) = self.sender.multicast(
            &forward.dest_addresses,
            forward.msg.clone(),
            forward.code,
            false,
        ) {
            tracing::error!(error = %e, "Failed to multicast forwarded message");
            return HandleOutcome::Failed(e);
        }

        HandleOutcome::Handled
    }

    /// Validates a forwarded enode certificate: signature against the claimed
    /// validator, version monotonic against the stored one.
    fn validate_enode_certificate(&self, payload: &[u8]) -> Result<(), ProxyError> {
        let cert: EnodeCertificate = decode_message(payload)
            .map_err(|e| ProxyError::InvalidEnodeCertificate(format!("decode failed: {e}")))?;

        if !self
            .verifier
            .verify(cert.address, &cert.signing_payload(), &cert.signature)
        {
            return Err(ProxyError::InvalidEnodeCertificate(format!(
                "signature does not verify against {}",
                cert.address
            )));
        }

        if !self.enode_table.upsert(cert.address, &cert.enode_url, cert.version) {
            let stored = self
                .enode_table
                .get(&cert.address)
                .map(|entry| entry.version)
                .unwrap_or_default();
            return Err(ProxyError::StaleEnodeVersion {
                address: cert.address,
                stored,
                received: cert.version,
            });
        }

        Ok(())
    }

    /// Receive path of the enode-share protocol: apply each record
    /// independently under the monotonic version rule.
    fn handle_val_enodes_share(&self, peer: &dyn PeerHandle, payload: &[u8]) -> HandleOutcome {
        if !self.is_from_proxied_validator(peer) {
            tracing::warn!(
                from = %peer.node_id(),
                "Ignoring enode share message from a peer that is not the proxied validator"
            );
            return HandleOutcome::NotMine;
        }

        let batch: ValEnodesShareMessage = match decode_message(payload) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(from = %peer.node_id(), error = %e, "Failed to decode enode share message");
                return HandleOutcome::Failed(e.into());
            }
        };

        let applied = self.enode_table.apply_share_batch(&batch);
        tracing::debug!(
            applied,
            total = batch.val_enodes.len(),
            "Applied validator enode share batch"
        );
        HandleOutcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sign_enode_certificate, ValidatorKeyRegistry};
    use crate::messages::{encode_message, SharedValidatorEnode};
    use alloy_primitives::{Bytes, B256};
    use ed25519_dalek::SigningKey;
    use parking_lot::Mutex;

    struct MockPeer {
        id: B256,
    }

    impl PeerHandle for MockPeer {
        fn node_id(&self) -> B256 {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct MulticastCall {
        dest_addresses: Vec<Address>,
        payload: Bytes,
        code: u64,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct UnicastCall {
        peer: B256,
        payload: Bytes,
        code: u64,
    }

    #[derive(Default)]
    struct MockSender {
        multicasts: Mutex<Vec<MulticastCall>>,
        unicasts: Mutex<Vec<UnicastCall>>,
        fail_multicast: bool,
    }

    impl MessageSender for MockSender {
        fn unicast(
            &self,
            peer: &dyn PeerHandle,
            payload: Bytes,
            code: u64,
        ) -> Result<(), ProxyError> {
            self.unicasts.lock().push(UnicastCall {
                peer: peer.node_id(),
                payload,
                code,
            });
            Ok(())
        }

        fn multicast(
            &self,
            dest_addresses: &[Address],
            payload: Bytes,
            code: u64,
            _send_to_self: bool,
        ) -> Result<(), ProxyError> {
            if self.fail_multicast {
                return Err(ProxyError::Network("multicast failed".into()));
            }
            self.multicasts.lock().push(MulticastCall {
                dest_addresses: dest_addresses.to_vec(),
                payload,
                code,
            });
            Ok(())
        }
    }

    fn engine_fixture(
        fail_multicast: bool,
        registry: ValidatorKeyRegistry,
    ) -> (
        ProxyEngine<MockSender, ValidatorKeyRegistry>,
        Arc<MockSender>,
        SharedPeer,
    ) {
        let sender = Arc::new(MockSender {
            fail_multicast,
            ..MockSender::default()
        });
        let config = EngineConfig::proxy(Address::repeat_byte(0x55));
        let engine = ProxyEngine::new(
            &config,
            sender.clone(),
            Arc::new(registry),
            Arc::new(ValidatorEnodeTable::new()),
        )
        .unwrap();

        let validator: SharedPeer = Arc::new(MockPeer {
            id: B256::repeat_byte(0x77),
        });
        engine.register_proxied_validator(validator.clone());
        (engine, sender, validator)
    }

    fn forward_payload(code: u64, dest: Vec<Address>, msg: &'static [u8]) -> Bytes {
        encode_message(&ForwardMessage {
            code,
            dest_addresses: dest,
            msg: Bytes::from_static(msg),
        })
    }

    #[test]
    fn test_role_enforced() {
        let config = EngineConfig::proxied_validator();
        let result = ProxyEngine::new(
            &config,
            Arc::new(MockSender::default()),
            Arc::new(ValidatorKeyRegistry::new()),
            Arc::new(ValidatorEnodeTable::new()),
        );
        assert!(matches!(result, Err(ProxyError::NotProxy)));
    }

    #[test]
    fn test_forward_from_stranger_ignored() {
        let (engine, sender, _validator) = engine_fixture(false, ValidatorKeyRegistry::new());
        let stranger = MockPeer {
            id: B256::repeat_byte(0xee),
        };

        let payload = forward_payload(7, vec![Address::repeat_byte(0xaa)], b"signed");
        let outcome = engine.handle_message(&stranger, FORWARD_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::NotMine));
        assert!(sender.multicasts.lock().is_empty());
    }

    #[test]
    fn test_forward_rebroadcast_preserves_payload() {
        let (engine, sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());

        let dest = vec![Address::repeat_byte(0xaa)];
        let payload = forward_payload(7, dest.clone(), b"signed-inner");
        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::Handled));

        let calls = sender.multicasts.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].dest_addresses, dest);
        assert_eq!(calls[0].code, 7);
        assert_eq!(calls[0].payload, Bytes::from_static(b"signed-inner"));
    }

    #[test]
    fn test_malformed_forward_is_failed() {
        let (engine, _sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());

        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &[0xff, 0x01]);
        assert!(matches!(outcome, HandleOutcome::Failed(ProxyError::Decode(_))));
    }

    #[test]
    fn test_multicast_failure_surfaced() {
        let (engine, _sender, validator) = engine_fixture(true, ValidatorKeyRegistry::new());

        let payload = forward_payload(7, vec![Address::repeat_byte(0xaa)], b"signed");
        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::Failed(ProxyError::Network(_))));
    }

    #[test]
    fn test_unrelated_code_not_mine() {
        let (engine, _sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());
        let outcome = engine.handle_message(validator.as_ref(), 0x42, b"whatever");
        assert!(matches!(outcome, HandleOutcome::NotMine));
        assert!(!outcome.is_handled());
    }

    #[test]
    fn test_valid_enode_certificate_forwarded() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let author = Address::repeat_byte(0x55);
        let mut registry = ValidatorKeyRegistry::new();
        registry.insert(author, key.verifying_key());
        let (engine, sender, validator) = engine_fixture(false, registry);

        let cert = sign_enode_certificate(&key, author, "enode://55@1.2.3.4:30303", 3);
        let inner = encode_message(&cert);
        let payload = encode_message(&ForwardMessage {
            code: ENODE_CERTIFICATE_MSG,
            dest_addresses: vec![Address::repeat_byte(0xaa)],
            msg: inner.clone(),
        });

        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::Handled));

        let calls = sender.multicasts.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].payload, inner);

        assert_eq!(engine.enode_table.get(&author).unwrap().version, 3);
    }

    #[test]
    fn test_forged_enode_certificate_rejected() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let forger = SigningKey::generate(&mut rand::thread_rng());
        let author = Address::repeat_byte(0x55);
        let mut registry = ValidatorKeyRegistry::new();
        registry.insert(author, key.verifying_key());
        let (engine, sender, validator) = engine_fixture(false, registry);

        let cert = sign_enode_certificate(&forger, author, "enode://55@1.2.3.4:30303", 3);
        let payload = encode_message(&ForwardMessage {
            code: ENODE_CERTIFICATE_MSG,
            dest_addresses: vec![Address::repeat_byte(0xaa)],
            msg: encode_message(&cert),
        });

        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(
            outcome,
            HandleOutcome::Failed(ProxyError::InvalidEnodeCertificate(_))
        ));
        assert!(sender.multicasts.lock().is_empty());
    }

    #[test]
    fn test_stale_enode_certificate_rejected() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let author = Address::repeat_byte(0x55);
        let mut registry = ValidatorKeyRegistry::new();
        registry.insert(author, key.verifying_key());
        let (engine, _sender, validator) = engine_fixture(false, registry);

        engine.enode_table.upsert(author, "enode://old@1.1.1.1:1", 9);

        let cert = sign_enode_certificate(&key, author, "enode://55@1.2.3.4:30303", 3);
        let payload = encode_message(&ForwardMessage {
            code: ENODE_CERTIFICATE_MSG,
            dest_addresses: Vec::new(),
            msg: encode_message(&cert),
        });

        let outcome = engine.handle_message(validator.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(
            outcome,
            HandleOutcome::Failed(ProxyError::StaleEnodeVersion { stored: 9, received: 3, .. })
        ));
    }

    #[test]
    fn test_share_batch_applied() {
        let (engine, _sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());

        let batch = ValEnodesShareMessage {
            val_enodes: vec![SharedValidatorEnode {
                address: Address::repeat_byte(0xab),
                enode_url: "enode://ab@2.2.2.2:2".into(),
                version: 4,
            }],
        };
        let payload = encode_message(&batch);

        let outcome = engine.handle_message(validator.as_ref(), VAL_ENODES_SHARE_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::Handled));
        assert_eq!(
            engine.enode_table.get(&Address::repeat_byte(0xab)).unwrap().version,
            4
        );
    }

    #[test]
    fn test_share_from_stranger_ignored() {
        let (engine, _sender, _validator) = engine_fixture(false, ValidatorKeyRegistry::new());
        let stranger = MockPeer {
            id: B256::repeat_byte(0xee),
        };

        let payload = encode_message(&ValEnodesShareMessage::default());
        let outcome = engine.handle_message(&stranger, VAL_ENODES_SHARE_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::NotMine));
        assert!(engine.enode_table.is_empty());
    }

    #[test]
    fn test_send_enode_certificate_to_proxied_validator() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let (engine, sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());

        let cert = sign_enode_certificate(
            &key,
            Address::repeat_byte(0x99),
            "enode://99@8.8.8.8:30303",
            2,
        );
        engine
            .send_enode_certificate_to_proxied_validator(&cert)
            .unwrap();

        let calls = sender.unicasts.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].peer, validator.node_id());
        assert_eq!(calls[0].code, ENODE_CERTIFICATE_MSG);

        let decoded: EnodeCertificate = decode_message(&calls[0].payload).unwrap();
        assert_eq!(decoded, cert);
    }

    #[test]
    fn test_send_enode_certificate_requires_registration() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let (engine, sender, validator) = engine_fixture(false, ValidatorKeyRegistry::new());
        engine.unregister_proxied_validator(validator.as_ref());

        let cert = sign_enode_certificate(
            &key,
            Address::repeat_byte(0x99),
            "enode://99@8.8.8.8:30303",
            2,
        );
        let result = engine.send_enode_certificate_to_proxied_validator(&cert);
        assert!(matches!(result, Err(ProxyError::NoProxiedValidatorPeer)));
        assert!(sender.unicasts.lock().is_empty());
    }

    #[test]
    fn test_register_replaces_and_unregister_checks_identity() {
        let (engine, _sender, first) = engine_fixture(false, ValidatorKeyRegistry::new());

        let second: SharedPeer = Arc::new(MockPeer {
            id: B256::repeat_byte(0x88),
        });
        engine.register_proxied_validator(second.clone());

        // The first connection is no longer authorized.
        let payload = forward_payload(7, vec![Address::repeat_byte(0xaa)], b"x");
        let outcome = engine.handle_message(first.as_ref(), FORWARD_MSG, &payload);
        assert!(matches!(outcome, HandleOutcome::NotMine));

        // Unregistering a stale connection is a no-op.
        engine.unregister_proxied_validator(first.as_ref());
        assert!(engine.proxied_validator_info().is_peered);

        engine.unregister_proxied_validator(second.as_ref());
        assert!(!engine.proxied_validator_info().is_peered);
    }
}
