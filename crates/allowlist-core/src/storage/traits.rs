//! Storage trait definitions

use crate::address::Address;
use crate::entry::{AllowlistEntry, IncomingEntry, MergePolicy, SourceFilter, TokenId};
use crate::merkle::Hash;
use crate::storage::error::StoreResult;

/// Durable keyed storage of allowlist entries.
///
/// Implementations must be safe to share across threads; every call is
/// treated by the engine as blocking I/O.
pub trait AllowlistStore: Send + Sync {
    /// Merge a chunk of incoming records into storage.
    ///
    /// Each record is combined with the stored entry for its address via
    /// [`MergePolicy::apply`], atomically for the whole chunk. Re-sending an
    /// identical chunk changes nothing.
    fn bulk_upsert(
        &self,
        entries: &[IncomingEntry],
        policy: &MergePolicy,
    ) -> StoreResult<UpsertStats>;

    /// Retrieve the entry for an address.
    ///
    /// Returns `None` if not found.
    fn get(&self, address: &Address) -> StoreResult<Option<AllowlistEntry>>;

    /// Check if an address has an entry.
    fn exists(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.get(address)?.is_some())
    }

    /// All addresses whose token ids contain `token_id` and whose source
    /// passes `filter`. Order is unspecified.
    fn scan(&self, token_id: TokenId, filter: &SourceFilter) -> StoreResult<Vec<Address>>;

    /// Administrative removal of an entry.
    ///
    /// Returns `true` if the entry was deleted, `false` if it didn't exist.
    fn delete(&self, address: &Address) -> StoreResult<bool>;

    /// Get the total count of entries.
    fn count(&self) -> StoreResult<usize>;
}

/// Durable `token id -> root` records.
pub trait RootStore: Send + Sync {
    /// Record the root of the commitment just built for `token_id`.
    fn persist_root(&self, token_id: TokenId, root: &Hash) -> StoreResult<()>;

    /// The last persisted root for `token_id`.
    fn get_persisted_root(&self, token_id: TokenId) -> StoreResult<Option<Hash>>;

    /// Drop the record for `token_id`.
    ///
    /// Returns `true` if a record existed.
    fn clear_root(&self, token_id: TokenId) -> StoreResult<bool>;
}

/// Per-chunk write statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl std::ops::AddAssign for UpsertStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}
