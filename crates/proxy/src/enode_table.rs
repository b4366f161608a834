//! Monotonically versioned store of validator enodes.

use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::RwLock;

use crate::messages::{SharedValidatorEnode, ValEnodesShareMessage};

/// Tracks the latest known enode for each validator.
///
/// Updates carry a version number; an update is applied only if its version
/// is greater than or equal to the stored one. Equal versions are accepted
/// idempotently. Entries are never removed by version traffic.
#[derive(Debug, Default)]
pub struct ValidatorEnodeTable {
    entries: RwLock<HashMap<Address, StoredEnode>>,
}

#[derive(Debug, Clone)]
struct StoredEnode {
    enode_url: String,
    version: u64,
}

impl ValidatorEnodeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one record if its version is not older than the stored one.
    ///
    /// Returns `true` if the record was applied, `false` if it was stale.
    pub fn upsert(&self, address: Address, enode_url: &str, version: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(&address) {
            Some(stored) if version < stored.version => false,
            Some(stored) => {
                stored.enode_url = enode_url.to_owned();
                stored.version = version;
                true
            }
            None => {
                entries.insert(
                    address,
                    StoredEnode {
                        enode_url: enode_url.to_owned(),
                        version,
                    },
                );
                true
            }
        }
    }

    /// Applies every record of a share batch independently; stale records are
    /// skipped without affecting the rest. Returns the number applied.
    pub fn apply_share_batch(&self, batch: &ValEnodesShareMessage) -> usize {
        let mut applied = 0;
        for record in &batch.val_enodes {
            if self.upsert(record.address, &record.enode_url, record.version) {
                applied += 1;
            } else {
                tracing::warn!(
                    address = %record.address,
                    version = record.version,
                    "Skipping stale validator enode record"
                );
            }
        }
        applied
    }

    /// Returns the stored record for a validator.
    pub fn get(&self, address: &Address) -> Option<SharedValidatorEnode> {
        self.entries.read().get(address).map(|stored| SharedValidatorEnode {
            address: *address,
            enode_url: stored.enode_url.clone(),
            version: stored.version,
        })
    }

    /// Returns the stored records for the given validators, skipping unknown
    /// addresses.
    pub fn entries_for(&self, addresses: &[Address]) -> Vec<SharedValidatorEnode> {
        let entries = self.entries.read();
        addresses
            .iter()
            .filter_map(|address| {
                entries.get(address).map(|stored| SharedValidatorEnode {
                    address: *address,
                    enode_url: stored.enode_url.clone(),
                    version: stored.version,
                })
            })
            .collect()
    }

    /// Number of validators with a stored enode.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no enodes are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
