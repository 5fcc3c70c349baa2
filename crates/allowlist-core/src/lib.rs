//! Allowlist Core Engine
//!
//! This crate provides the computational kernel for the allowlist service:
//! everything needed to turn raw `address -> token ids` rows into a
//! deterministic Merkle commitment per token id, without any I/O of its own.
//!
//! # Modules
//!
//! - `address` - canonical 20-byte address parsing
//! - `entry` - allowlist entries, provenance tags and the merge policy
//! - `ingest` - batch parsing and aggregation of ingestion rows
//! - `merkle` - sorted-pair Keccak Merkle trees, proofs and verification
//! - `storage` - the store adapter traits and an in-memory backend
//!
//! # Example
//!
//! ```rust
//! use allowlist_core::address::normalize;
//! use allowlist_core::merkle::{leaf_hash, verify_proof, Commitment};
//!
//! let a = normalize("0x1111111111111111111111111111111111111111").unwrap();
//! let b = normalize("0x2222222222222222222222222222222222222222").unwrap();
//!
//! let commitment = Commitment::build(vec![b, a]).unwrap();
//! let proof = commitment.proof(&a).unwrap();
//! assert!(verify_proof(leaf_hash(&a), &proof, &commitment.root()));
//! ```

pub mod address;
pub mod entry;
pub mod ingest;
pub mod merkle;
pub mod storage;

// Re-export main types at crate root
pub use address::{normalize, Address};
pub use entry::{
    AllowlistEntry, IncomingEntry, MergePolicy, Source, SourceFilter, SourcePolicy, TokenId,
};
pub use ingest::{parse_rows, AggregatedBatch, Aggregator, IngestReport, InputRow, RowRejection};
pub use merkle::{leaf_hash, verify_proof, Commitment, Hash, ProofResponse};
pub use storage::{AllowlistStore, MemoryStore, RootStore, StoreError, UpsertStats};
