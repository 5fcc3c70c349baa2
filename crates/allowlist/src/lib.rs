//! # Allowlist Service
//!
//! Async composition of the allowlist engine:
//! - **config**: deployment settings, read from the environment
//! - **registry**: per-token-id commitment cache and root registry
//! - **service**: ingestion, membership checks and proof serving
//! - **error**: service error type
//! - **tracing**: logging setup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use allowlist::{AllowlistConfig, AllowlistService};
//! use allowlist_core::{InputRow, MemoryStore};
//!
//! # async fn run() -> allowlist::Result<()> {
//! let service = AllowlistService::new(MemoryStore::new(), AllowlistConfig::from_env()?);
//!
//! service
//!     .ingest(vec![InputRow::new("0x00000000000000000000000000000000000000aa", vec![1])])
//!     .await?;
//!
//! if let Some(proof) = service.get_proof("0x00000000000000000000000000000000000000aa", 1).await? {
//!     println!("{}", serde_json::to_string(&proof)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod tracing;

pub use config::AllowlistConfig;
pub use error::{Error, Result};
pub use registry::CommitmentRegistry;
pub use service::{open_sqlite, AllowlistService, SqliteService};
