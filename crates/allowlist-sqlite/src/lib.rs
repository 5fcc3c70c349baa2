//! SQLite storage backend for the allowlist
//!
//! This crate provides a persistent SQLite implementation of the
//! allowlist-core storage traits.
//!
//! # Features
//!
//! - Implements `AllowlistStore` and `RootStore`
//! - Bulk upserts merge with stored rows inside one transaction per chunk
//! - Token id scans run in SQL via the JSON1 `json_each` table function
//! - Supports in-memory databases for testing
//!
//! # Example
//!
//! ```rust,no_run
//! use allowlist_core::storage::{AllowlistStore, RootStore};
//! use allowlist_core::{normalize, IncomingEntry, MergePolicy, SourceFilter};
//! use allowlist_sqlite::SqliteStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::open("allowlist.db")?;
//!
//! let address = normalize("0x00000000000000000000000000000000000000aa").ok_or("bad address")?;
//! let mut incoming = IncomingEntry::new(address);
//! incoming.token_ids.insert(1);
//! store.bulk_upsert(&[incoming], &MergePolicy::default())?;
//!
//! let eligible = store.scan(1, &SourceFilter::Unrestricted)?;
//! assert_eq!(eligible, vec![address]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod json;
pub mod migrate;
pub mod store;

// Re-export main types
pub use error::{Result, SqliteError};
pub use store::SqliteStore;
