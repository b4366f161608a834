//! Proxy set and validator-to-proxy assignment state.
//!
//! `ProxySet` is the single source of truth for which proxies exist, which
//! are connected, and which remote validator each proxy serves. It is plain
//! single-owner state; the proxied-validator engine wraps it in an actor task
//! so all reads and writes are serialized.
//!
//! Distribution policy: rendezvous hashing. An unassigned validator address
//! goes to the candidate proxy maximizing `keccak256(proxy_id || address)`,
//! candidates being the peered proxies when any exist, otherwise all known
//! proxies. An existing assignment is kept as long as its proxy is still
//! configured, so transient disconnects never reshuffle assignments.

use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};

use alloy_primitives::{keccak256, Address, B256};

use crate::enode::Enode;
use crate::error::ProxyError;
use crate::net::SharedPeer;
use crate::types::{unix_now, ProxyEntry, ProxyInfo};

/// One outbound transmission target: a connected proxy peer and the
/// destination addresses it serves.
pub(crate) struct SendGroup {
    pub(crate) peer: SharedPeer,
    pub(crate) addresses: Vec<Address>,
}

/// The set of configured proxies plus the current validator assignments.
#[derive(Default)]
pub struct ProxySet {
    /// Known proxies, keyed by internal node id.
    proxies: HashMap<B256, ProxyEntry>,
    /// Current assignment of remote validator addresses to proxies.
    assignments: HashMap<Address, B256>,
    /// The remote validator set to serve.
    validators: BTreeSet<Address>,
}

impl ProxySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a proxy. The new entry starts disconnected with its disconnect
    /// timestamp set to now.
    pub fn add_proxy(&mut self, internal: Enode, external: Enode) -> Result<(), ProxyError> {
        let id = internal.id();
        if self.proxies.contains_key(&id) {
            return Err(ProxyError::DuplicateProxy(id));
        }
        tracing::info!(proxy = %id, internal = %internal, external = %external, "Adding proxy");
        self.proxies
            .insert(id, ProxyEntry::new(internal, external, unix_now()));
        self.reassign();
        Ok(())
    }

    /// Removes a proxy and reassigns every validator it served.
    ///
    /// Returns the addresses that were assigned to it.
    pub fn remove_proxy(&mut self, id: B256) -> Result<Vec<Address>, ProxyError> {
        if self.proxies.remove(&id).is_none() {
            return Err(ProxyError::UnknownProxy(id));
        }
        let freed: Vec<Address> = self
            .assignments
            .iter()
            .filter(|(_, assigned)| **assigned == id)
            .map(|(address, _)| *address)
            .collect();
        for address in &freed {
            self.assignments.remove(address);
        }
        tracing::info!(proxy = %id, reassigned = freed.len(), "Removed proxy");
        self.reassign();
        Ok(freed)
    }

    /// Attaches a connecting peer to its proxy entry.
    ///
    /// Fails with `UnauthorizedPeer` if the peer is not a configured proxy.
    pub fn attach_peer(&mut self, peer: SharedPeer) -> Result<(), ProxyError> {
        let id = peer.node_id();
        match self.proxies.get_mut(&id) {
            Some(entry) => {
                tracing::debug!(proxy = %id, "Proxy peer connected");
                entry.attach_peer(peer);
                self.reassign();
                Ok(())
            }
            None => Err(ProxyError::UnauthorizedPeer(id)),
        }
    }

    /// Detaches the connection of the given proxy, if attached. Idempotent;
    /// assignments are left in place so a transient disconnect does not
    /// reshuffle them.
    pub fn detach_peer(&mut self, node_id: B256) {
        if let Some(entry) = self.proxies.get_mut(&node_id) {
            if entry.is_peered() {
                tracing::debug!(proxy = %node_id, "Proxy peer disconnected");
                entry.detach_peer(unix_now());
            }
        }
    }

    /// Replaces the remote validator set and recomputes assignments.
    /// Assignments of retained addresses to still-known proxies are kept.
    pub fn assign_validators(&mut self, addresses: Vec<Address>) {
        self.validators = addresses.into_iter().collect();
        let validators = &self.validators;
        self.assignments.retain(|address, _| validators.contains(address));
        self.reassign();
    }

    /// Returns the proxy currently assigned to a validator address.
    pub fn lookup(&self, address: &Address) -> Option<&ProxyEntry> {
        self.assignments
            .get(address)
            .and_then(|id| self.proxies.get(id))
    }

    /// Number of configured proxies.
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Consistent point-in-time view: every proxy's info plus the per-proxy
    /// assignment lists.
    pub fn snapshot(&self) -> (Vec<ProxyInfo>, HashMap<B256, Vec<Address>>) {
        let mut per_proxy: HashMap<B256, Vec<Address>> = self
            .proxies
            .keys()
            .map(|id| (*id, Vec::new()))
            .collect();
        for (address, id) in &self.assignments {
            if let Some(assigned) = per_proxy.get_mut(id) {
                assigned.push(*address);
            }
        }
        for assigned in per_proxy.values_mut() {
            assigned.sort();
        }

        let mut infos: Vec<ProxyInfo> = self
            .proxies
            .values()
            .map(|entry| {
                let assigned = per_proxy.get(&entry.id()).cloned().unwrap_or_default();
                ProxyInfo::new(entry, assigned)
            })
            .collect();
        infos.sort_by_key(|info| info.internal_node.id());

        (infos, per_proxy)
    }

    /// The assignment of each tracked validator to its proxy's internal
    /// enode; `None` for validators no proxy currently serves.
    pub fn validator_assignments(&self) -> HashMap<Address, Option<Enode>> {
        self.validators
            .iter()
            .map(|address| {
                let enode = self
                    .lookup(address)
                    .map(|entry| entry.internal_enode().clone());
                (*address, enode)
            })
            .collect()
    }

    /// Groups destination addresses by the connected proxy assigned to them.
    ///
    /// Addresses with no assignment, or whose proxy is currently
    /// disconnected, come back in the second list.
    pub(crate) fn resolve_send_groups(
        &self,
        addresses: &[Address],
    ) -> (Vec<SendGroup>, Vec<Address>) {
        let mut groups: BTreeMap<B256, SendGroup> = BTreeMap::new();
        let mut unreachable = Vec::new();

        for &address in addresses {
            let reachable = self
                .assignments
                .get(&address)
                .and_then(|id| self.proxies.get(id))
                .and_then(|entry| entry.peer().map(|peer| (entry.id(), peer.clone())));
            match reachable {
                Some((id, peer)) => match groups.entry(id) {
                    btree_map::Entry::Occupied(mut group) => {
                        group.get_mut().addresses.push(address);
                    }
                    btree_map::Entry::Vacant(slot) => {
                        slot.insert(SendGroup {
                            peer,
                            addresses: vec![address],
                        });
                    }
                },
                None => unreachable.push(address),
            }
        }

        (groups.into_values().collect(), unreachable)
    }

    /// Every connected proxy with the validators assigned to it, in node-id
    /// order.
    pub(crate) fn peered_groups(&self) -> Vec<SendGroup> {
        let (_, per_proxy) = self.snapshot();
        let mut ids: Vec<B256> = self
            .proxies
            .values()
            .filter(|entry| entry.is_peered())
            .map(|entry| entry.id())
            .collect();
        ids.sort();

        ids.into_iter()
            .filter_map(|id| {
                let entry = self.proxies.get(&id)?;
                let peer = entry.peer()?.clone();
                Some(SendGroup {
                    peer,
                    addresses: per_proxy.get(&id).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Fills in assignments for validators that currently have none.
    fn reassign(&mut self) {
        let proxies = &self.proxies;
        self.assignments.retain(|_, id| proxies.contains_key(id));

        let mut candidates: Vec<B256> = self
            .proxies
            .values()
            .filter(|entry| entry.is_peered())
            .map(|entry| entry.id())
            .collect();
        if candidates.is_empty() {
            candidates = self.proxies.keys().copied().collect();
        }
        if candidates.is_empty() {
            return;
        }
        candidates.sort();

        for &address in &self.validators {
            if !self.assignments.contains_key(&address) {
                if let Some(id) = rendezvous_choice(&candidates, &address) {
                    tracing::debug!(validator = %address, proxy = %id, "Assigned validator to proxy");
                    self.assignments.insert(address, id);
                }
            }
        }
    }
}

/// Picks the candidate maximizing `keccak256(candidate_id || address)`.
fn rendezvous_choice(candidates: &[B256], address: &Address) -> Option<B256> {
    candidates.iter().copied().max_by_key(|id| {
        let mut buf = [0u8; 52];
        buf[..32].copy_from_slice(id.as_slice());
        buf[32..].copy_from_slice(address.as_slice());
        keccak256(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::PeerHandle;
    use std::sync::Arc;

    struct MockPeer {
        id: B256,
    }

    impl PeerHandle for MockPeer {
        fn node_id(&self) -> B256 {
            self.id
        }
    }

    fn enode(byte: u8) -> Enode {
        Enode::new([byte; 64], "10.0.0.1", 30303)
    }

    fn peer_for(enode: &Enode) -> SharedPeer {
        Arc::new(MockPeer { id: enode.id() })
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_add_duplicate_proxy_fails() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(2)).unwrap();
        let err = set.add_proxy(enode(1), enode(3)).unwrap_err();
        assert!(matches!(err, ProxyError::DuplicateProxy(id) if id == enode(1).id()));
    }

    #[test]
    fn test_remove_unknown_proxy_fails() {
        let mut set = ProxySet::new();
        let err = set.remove_proxy(enode(1).id()).unwrap_err();
        assert!(matches!(err, ProxyError::UnknownProxy(_)));
    }

    #[test]
    fn test_single_proxy_serves_all_validators() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(2)).unwrap();
        set.assign_validators(vec![addr(0xaa), addr(0xbb)]);

        let id = enode(1).id();
        assert_eq!(set.lookup(&addr(0xaa)).map(ProxyEntry::id), Some(id));
        assert_eq!(set.lookup(&addr(0xbb)).map(ProxyEntry::id), Some(id));
    }

    #[test]
    fn test_unauthorized_peer_rejected() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(2)).unwrap();

        let stranger = peer_for(&enode(9));
        let err = set.attach_peer(stranger).unwrap_err();
        assert!(matches!(err, ProxyError::UnauthorizedPeer(id) if id == enode(9).id()));
    }

    #[test]
    fn test_assignment_exclusivity() {
        let mut set = ProxySet::new();
        for byte in 1..=3u8 {
            set.add_proxy(enode(byte), enode(byte + 0x10)).unwrap();
        }
        let validators: Vec<Address> = (0..20u8).map(addr).collect();
        set.assign_validators(validators.clone());

        let (_, per_proxy) = set.snapshot();
        let total: usize = per_proxy.values().map(Vec::len).sum();
        assert_eq!(total, validators.len());

        let mut seen = BTreeSet::new();
        for assigned in per_proxy.values() {
            for address in assigned {
                assert!(seen.insert(*address), "validator assigned twice: {address}");
            }
        }
    }

    #[test]
    fn test_assignment_stable_across_disconnect_reconnect() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.add_proxy(enode(2), enode(0x12)).unwrap();
        set.attach_peer(peer_for(&enode(1))).unwrap();
        set.attach_peer(peer_for(&enode(2))).unwrap();
        set.assign_validators((0..10u8).map(addr).collect());

        let (_, before) = set.snapshot();

        set.detach_peer(enode(1).id());
        set.attach_peer(peer_for(&enode(1))).unwrap();

        let (_, after) = set.snapshot();
        assert_eq!(before, after);
    }

    #[test]
    fn test_duplicate_disconnect_is_noop() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.attach_peer(peer_for(&enode(1))).unwrap();

        set.detach_peer(enode(1).id());
        set.detach_peer(enode(1).id());
        set.detach_peer(enode(9).id());

        let (infos, _) = set.snapshot();
        assert!(!infos[0].is_peered);
    }

    #[test]
    fn test_remove_proxy_reassigns_to_survivor() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.add_proxy(enode(2), enode(0x12)).unwrap();
        set.assign_validators((0..8u8).map(addr).collect());

        let removed = set.remove_proxy(enode(1).id()).unwrap();
        let survivor = enode(2).id();
        for address in (0..8u8).map(addr) {
            assert_eq!(set.lookup(&address).map(ProxyEntry::id), Some(survivor));
        }
        // The freed addresses were reported.
        for address in removed {
            assert!(set.lookup(&address).is_some());
        }
    }

    #[test]
    fn test_remove_last_proxy_leaves_validators_unassigned() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.assign_validators(vec![addr(0xaa), addr(0xbb)]);

        set.remove_proxy(enode(1).id()).unwrap();
        assert!(set.lookup(&addr(0xaa)).is_none());
        assert!(set.lookup(&addr(0xbb)).is_none());

        let (groups, unreachable) = set.resolve_send_groups(&[addr(0xaa)]);
        assert!(groups.is_empty());
        assert_eq!(unreachable, vec![addr(0xaa)]);
    }

    #[test]
    fn test_peered_proxies_preferred() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.add_proxy(enode(2), enode(0x12)).unwrap();
        set.attach_peer(peer_for(&enode(2))).unwrap();
        set.assign_validators((0..6u8).map(addr).collect());

        let peered = enode(2).id();
        for address in (0..6u8).map(addr) {
            assert_eq!(set.lookup(&address).map(ProxyEntry::id), Some(peered));
        }
    }

    #[test]
    fn test_assignment_deterministic() {
        let build = || {
            let mut set = ProxySet::new();
            for byte in 1..=4u8 {
                set.add_proxy(enode(byte), enode(byte + 0x10)).unwrap();
            }
            set.assign_validators((0..32u8).map(addr).collect());
            set.snapshot().1
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_resolve_groups_skips_disconnected_proxy() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();
        set.assign_validators(vec![addr(0xaa)]);

        // Assigned but not peered: unreachable for sending.
        let (groups, unreachable) = set.resolve_send_groups(&[addr(0xaa)]);
        assert!(groups.is_empty());
        assert_eq!(unreachable, vec![addr(0xaa)]);

        set.attach_peer(peer_for(&enode(1))).unwrap();
        let (groups, unreachable) = set.resolve_send_groups(&[addr(0xaa)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].addresses, vec![addr(0xaa)]);
        assert!(unreachable.is_empty());
    }

    #[test]
    fn test_snapshot_reflects_peering() {
        let mut set = ProxySet::new();
        set.add_proxy(enode(1), enode(0x11)).unwrap();

        let (infos, _) = set.snapshot();
        assert!(!infos[0].is_peered);

        set.attach_peer(peer_for(&enode(1))).unwrap();
        let (infos, _) = set.snapshot();
        assert!(infos[0].is_peered);
        assert_eq!(infos[0].internal_node, enode(1));
        assert_eq!(infos[0].external_node, enode(0x11));
    }
}
