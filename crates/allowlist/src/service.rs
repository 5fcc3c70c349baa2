//! Membership and proof service.
//!
//! Composes the aggregator, the store adapter and the commitment registry.
//! Store calls and aggregation run on the blocking pool; nothing here holds
//! a lock across them.

use std::path::Path;
use std::sync::Arc;

use allowlist_core::storage::{AllowlistStore, RootStore};
use allowlist_core::{
    normalize, parse_rows, Address, AggregatedBatch, Commitment, Hash, IngestReport, InputRow,
    ProofResponse, RowRejection, StoreError, TokenId, UpsertStats,
};
use allowlist_sqlite::SqliteStore;
use tracing::{debug, info};

use crate::config::AllowlistConfig;
use crate::error::Result;
use crate::registry::{blocking, CommitmentRegistry};

/// Service over the SQLite store adapter.
pub type SqliteService = AllowlistService<SqliteStore>;

/// Open the store named by `config` (in memory when no path is set).
pub fn open_sqlite(config: AllowlistConfig) -> Result<SqliteService> {
    let store = match &config.database_path {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::in_memory(),
    }
    .map_err(StoreError::from)?;

    Ok(AllowlistService::new(store, config))
}

pub struct AllowlistService<S> {
    store: Arc<S>,
    config: AllowlistConfig,
    registry: CommitmentRegistry<S>,
}

impl<S> AllowlistService<S>
where
    S: AllowlistStore + RootStore + 'static,
{
    pub fn new(store: S, config: AllowlistConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }

    /// Share an existing store handle.
    pub fn with_store(store: Arc<S>, config: AllowlistConfig) -> Self {
        let registry = CommitmentRegistry::new(Arc::clone(&store), config.allowed_sources.clone());
        Self {
            store,
            config,
            registry,
        }
    }

    pub fn config(&self) -> &AllowlistConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &CommitmentRegistry<S> {
        &self.registry
    }

    /// Aggregate and persist a batch of rows.
    ///
    /// Invalid rows are skipped and listed in the report. Entries are written
    /// in chunks of `chunk_size`; a storage failure aborts the remaining
    /// chunks and may be retried with the same batch.
    pub async fn ingest(&self, rows: impl IntoIterator<Item = InputRow>) -> Result<IngestReport> {
        let rows: Vec<_> = rows.into_iter().map(Ok).collect();
        self.ingest_parsed(rows).await
    }

    /// Ingest a JSON array of row objects.
    pub async fn ingest_json(&self, json: &str) -> Result<IngestReport> {
        let rows = parse_rows(json)?;
        self.ingest_parsed(rows).await
    }

    /// Ingest the JSON array stored at `path`.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        info!(file = %path.display(), "importing allowlist rows");
        self.ingest_json(&json).await
    }

    async fn ingest_parsed(
        &self,
        rows: Vec<std::result::Result<InputRow, RowRejection>>,
    ) -> Result<IngestReport> {
        let policy = self.config.merge_policy();
        let batch =
            tokio::task::spawn_blocking(move || AggregatedBatch::from_rows(policy, rows)).await?;

        let total = batch.entries.len();
        let mut stats = UpsertStats::default();
        let mut written = 0;

        for chunk in batch.chunks(self.config.chunk_size) {
            let chunk = chunk.to_vec();
            let len = chunk.len();
            stats += blocking(&self.store, move |store| store.bulk_upsert(&chunk, &policy)).await?;
            written += len;
            info!(written, total, "upserted chunk");
        }

        let mut report = batch.report;
        report.created = stats.created;
        report.updated = stats.updated;
        report.unchanged = stats.unchanged;

        info!(
            rows = report.rows,
            accepted = report.accepted,
            rejected = report.rejected_count(),
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            "ingestion finished"
        );

        if self.config.rebuild_on_ingest {
            for token_id in &report.touched_token_ids {
                self.registry.rebuild(*token_id).await?;
            }
        }

        Ok(report)
    }

    /// Whether `address` may claim `token_id` under the configured filter.
    ///
    /// Malformed addresses are simply not eligible.
    pub async fn is_eligible(&self, address: &str, token_id: TokenId) -> Result<bool> {
        let Some(address) = normalize(address) else {
            debug!(address, "eligibility check on malformed address");
            return Ok(false);
        };

        let entry = blocking(&self.store, move |store| store.get(&address)).await?;
        Ok(entry.is_some_and(|entry| {
            entry.contains(token_id) && self.config.allowed_sources.allows(entry.source)
        }))
    }

    /// Proof and root for an eligible address.
    ///
    /// An eligible address missing from the cached commitment (written by
    /// another process, or with `rebuild_on_ingest` off) triggers one
    /// rebuild before the lookup is retried.
    pub async fn get_proof(&self, address: &str, token_id: TokenId) -> Result<Option<ProofResponse>> {
        if !self.is_eligible(address, token_id).await? {
            return Ok(None);
        }
        let Some(address) = normalize(address) else {
            return Ok(None);
        };

        let cached = self.registry.get(token_id).await?;
        if let Some(proof) = prove(cached.as_deref(), &address) {
            return Ok(Some(proof));
        }

        debug!(%address, token_id, "eligible address missing from commitment, rebuilding");
        let rebuilt = self.registry.rebuild(token_id).await?;
        Ok(prove(rebuilt.as_deref(), &address))
    }

    /// Root of the current commitment, building it if needed.
    pub async fn get_root(&self, token_id: TokenId) -> Result<Option<Hash>> {
        Ok(self
            .registry
            .get(token_id)
            .await?
            .map(|commitment| commitment.root()))
    }

    /// Force a rebuild of `token_id` from the store.
    pub async fn rebuild(&self, token_id: TokenId) -> Result<Option<Hash>> {
        Ok(self
            .registry
            .rebuild(token_id)
            .await?
            .map(|commitment| commitment.root()))
    }

    /// Rebuild every token id that currently holds a commitment.
    pub async fn rebuild_all(&self) -> Result<Vec<(TokenId, Option<Hash>)>> {
        let mut roots = Vec::new();
        for token_id in self.registry.cached_token_ids() {
            roots.push((token_id, self.rebuild(token_id).await?));
        }
        Ok(roots)
    }

    /// The last root written to the root registry.
    pub async fn persisted_root(&self, token_id: TokenId) -> Result<Option<Hash>> {
        blocking(&self.store, move |store| store.get_persisted_root(token_id)).await
    }

    /// Administrative removal of an address.
    ///
    /// The removed entry's token ids are rebuilt when `rebuild_on_ingest` is
    /// set; otherwise the caller must rebuild them. Returns `false` for an
    /// unknown or malformed address.
    pub async fn remove(&self, address: &str) -> Result<bool> {
        let Some(address) = normalize(address) else {
            return Ok(false);
        };

        let removed = blocking(&self.store, move |store| {
            let entry = store.get(&address)?;
            if entry.is_some() {
                store.delete(&address)?;
            }
            Ok(entry)
        })
        .await?;

        let Some(entry) = removed else {
            return Ok(false);
        };
        info!(%address, token_ids = ?entry.token_ids, "removed allowlist entry");

        if self.config.rebuild_on_ingest {
            for token_id in entry.token_ids {
                self.registry.rebuild(token_id).await?;
            }
        }
        Ok(true)
    }
}

fn prove(commitment: Option<&Commitment>, address: &Address) -> Option<ProofResponse> {
    let commitment = commitment?;
    let proof = commitment.proof(address)?;
    Some(ProofResponse::new(&proof, &commitment.root()))
}
