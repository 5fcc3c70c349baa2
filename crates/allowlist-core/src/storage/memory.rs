//! In-memory storage backend
//!
//! A simple HashMap-based implementation for testing and development.
//! Not suitable for production use due to lack of persistence.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::address::Address;
use crate::entry::{AllowlistEntry, IncomingEntry, MergePolicy, SourceFilter, TokenId};
use crate::merkle::Hash;
use crate::storage::error::StoreResult;
use crate::storage::traits::{AllowlistStore, RootStore, UpsertStats};

/// In-memory allowlist and root store.
///
/// Useful for:
/// - Unit testing
/// - Development/prototyping
/// - Short-lived processes that don't need persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Address, AllowlistEntry>>,
    roots: RwLock<HashMap<TokenId, Hash>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store with initial entries.
    pub fn with_entries(entries: Vec<AllowlistEntry>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.write();
            for entry in entries {
                map.insert(entry.address, entry);
            }
        }
        store
    }

    /// Snapshot of all entries (for testing).
    pub fn all(&self) -> Vec<AllowlistEntry> {
        let mut entries: Vec<AllowlistEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by_key(|entry| entry.address);
        entries
    }
}

impl AllowlistStore for MemoryStore {
    fn bulk_upsert(
        &self,
        entries: &[IncomingEntry],
        policy: &MergePolicy,
    ) -> StoreResult<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut map = self.entries.write();

        for incoming in entries {
            let current = map.get(&incoming.address);
            let merged = policy.apply(current, incoming);
            match current {
                None => stats.created += 1,
                Some(existing) if *existing == merged => {
                    stats.unchanged += 1;
                    continue;
                }
                Some(_) => stats.updated += 1,
            }
            map.insert(merged.address, merged);
        }

        Ok(stats)
    }

    fn get(&self, address: &Address) -> StoreResult<Option<AllowlistEntry>> {
        Ok(self.entries.read().get(address).cloned())
    }

    fn scan(&self, token_id: TokenId, filter: &SourceFilter) -> StoreResult<Vec<Address>> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|entry| entry.contains(token_id) && filter.allows(entry.source))
            .map(|entry| entry.address)
            .collect())
    }

    fn delete(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.entries.write().remove(address).is_some())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.entries.read().len())
    }
}

impl RootStore for MemoryStore {
    fn persist_root(&self, token_id: TokenId, root: &Hash) -> StoreResult<()> {
        self.roots.write().insert(token_id, *root);
        Ok(())
    }

    fn get_persisted_root(&self, token_id: TokenId) -> StoreResult<Option<Hash>> {
        Ok(self.roots.read().get(&token_id).copied())
    }

    fn clear_root(&self, token_id: TokenId) -> StoreResult<bool> {
        Ok(self.roots.write().remove(&token_id).is_some())
    }
}
