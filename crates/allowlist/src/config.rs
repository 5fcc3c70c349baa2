//! Deployment configuration.
//!
//! Every setting has a default; [`AllowlistConfig::from_env`] overlays the
//! environment on top of those defaults.

use std::path::PathBuf;

use allowlist_core::ingest::DEFAULT_CHUNK_SIZE;
use allowlist_core::{MergePolicy, Source, SourceFilter, SourcePolicy};

use crate::error::{Error, Result};

/// Comma separated provenance tags that count towards eligibility.
pub const ENV_SOURCES: &str = "WHITELIST_SOURCES";
/// Path of the SQLite database file.
pub const ENV_DATABASE: &str = "ALLOWLIST_DATABASE";
/// Number of aggregated entries written per store call.
pub const ENV_CHUNK_SIZE: &str = "ALLOWLIST_CHUNK_SIZE";
/// Whether ingestion rebuilds every token id it touched.
pub const ENV_REBUILD_ON_INGEST: &str = "ALLOWLIST_REBUILD_ON_INGEST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistConfig {
    /// Applied identically to membership checks and commitment builds.
    pub allowed_sources: SourceFilter,
    /// `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub rebuild_on_ingest: bool,
    pub source_policy: SourcePolicy,
    /// Source recorded for addresses first seen without one.
    pub default_source: Source,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            allowed_sources: SourceFilter::Unrestricted,
            database_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            rebuild_on_ingest: true,
            source_policy: SourcePolicy::KeepFirst,
            default_source: Source::Manual,
        }
    }
}

impl AllowlistConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_SOURCES) {
            config.allowed_sources = SourceFilter::parse_list(&raw);
        }

        if let Some(raw) = lookup(ENV_DATABASE).filter(|raw| !raw.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(raw.trim()));
        }

        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_chunk_size(&raw)?;
        }

        if let Some(raw) = lookup(ENV_REBUILD_ON_INGEST) {
            config.rebuild_on_ingest = parse_bool(ENV_REBUILD_ON_INGEST, &raw)?;
        }

        Ok(config)
    }

    pub fn with_allowed_sources(mut self, filter: SourceFilter) -> Self {
        self.allowed_sources = filter;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_rebuild_on_ingest(mut self, enabled: bool) -> Self {
        self.rebuild_on_ingest = enabled;
        self
    }

    pub fn with_source_policy(mut self, policy: SourcePolicy) -> Self {
        self.source_policy = policy;
        self
    }

    pub fn with_default_source(mut self, source: Source) -> Self {
        self.default_source = source;
        self
    }

    /// The aggregation rule implied by this configuration.
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            default_source: self.default_source,
            source: self.source_policy,
        }
    }
}

/// Parse a chunk size; zero and non-numbers are rejected.
pub fn parse_chunk_size(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(Error::Config(format!("{} must be positive", ENV_CHUNK_SIZE))),
        Ok(n) => Ok(n),
        Err(e) => Err(Error::Config(format!("{}={:?}: {}", ENV_CHUNK_SIZE, raw, e))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{}={:?} is not a boolean", key, other))),
    }
}
