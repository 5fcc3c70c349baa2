//! Storage abstraction for allowlist entries and committed roots
//!
//! This module defines the store adapter traits the engine consumes.
//! Implementations exist for:
//!
//! - **Memory**: In-memory storage for testing (`MemoryStore`)
//! - **SQLite**: Durable storage via rusqlite (separate crate, `allowlist-sqlite`)
//!
//! Both traits take `&self` so one store can be shared between concurrent
//! ingestion, membership checks and rebuilds.
//!
//! # Example
//!
//! ```rust
//! use allowlist_core::storage::{AllowlistStore, MemoryStore};
//! use allowlist_core::{normalize, IncomingEntry, MergePolicy, SourceFilter};
//!
//! let store = MemoryStore::new();
//! let address = normalize("0x00000000000000000000000000000000000000aa").unwrap();
//!
//! let mut incoming = IncomingEntry::new(address);
//! incoming.token_ids.insert(1);
//! store.bulk_upsert(&[incoming], &MergePolicy::default()).unwrap();
//!
//! let eligible = store.scan(1, &SourceFilter::Unrestricted).unwrap();
//! assert_eq!(eligible, vec![address]);
//! ```

mod error;
mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::{AllowlistStore, RootStore, UpsertStats};
