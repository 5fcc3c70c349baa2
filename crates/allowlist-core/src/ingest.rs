//! Ingestion: parsing raw rows and aggregating them per address.
//!
//! A batch is folded into one [`IncomingEntry`] per canonical address using
//! [`MergePolicy::combine`]. Rows that cannot be admitted are dropped and
//! counted in the [`IngestReport`]; they never abort the batch.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::address::{normalize, Address};
use crate::entry::{touched_token_ids, IncomingEntry, MergePolicy, Source, TokenId};

/// Default number of entries written per store call.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// One raw ingestion record: `{address, token_ids, source?, note?}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputRow {
    pub address: String,
    #[serde(default)]
    pub token_ids: Option<Vec<TokenId>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl InputRow {
    pub fn new(address: impl Into<String>, token_ids: Vec<TokenId>) -> Self {
        Self {
            address: address.into(),
            token_ids: Some(token_ids),
            source: None,
            note: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("no token ids for {0}")]
    MissingTokenIds(Address),

    #[error("unknown source {tag:?} for {address}")]
    UnknownSource { address: Address, tag: String },

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// A dropped row and its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub index: usize,
    pub reason: RowRejection,
}

/// Outcome of aggregating (and optionally persisting) a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows seen, including rejected ones.
    pub rows: usize,
    pub accepted: usize,
    pub rejected: Vec<Rejected>,
    pub unique_addresses: usize,
    /// Filled in once the batch has been written.
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Ascending token ids referenced by accepted rows.
    pub touched_token_ids: Vec<TokenId>,
}

impl IngestReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Decode a JSON array of ingestion rows.
///
/// Each element is decoded on its own so one bad record only rejects itself.
/// A document that is not an array fails as a whole.
pub fn parse_rows(json: &str) -> serde_json::Result<Vec<Result<InputRow, RowRejection>>> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    Ok(values
        .into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|e| RowRejection::Malformed(e.to_string()))
        })
        .collect())
}

/// Folds ingestion rows into one record per canonical address.
#[derive(Debug, Default)]
pub struct Aggregator {
    policy: MergePolicy,
    entries: BTreeMap<Address, IncomingEntry>,
    rows: usize,
    accepted: usize,
    rejected: Vec<Rejected>,
}

impl Aggregator {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Add one row. Returns the canonical address it was merged into.
    pub fn push(&mut self, row: InputRow) -> Result<Address, RowRejection> {
        let index = self.next_index();
        match validate(row) {
            Ok(incoming) => Ok(self.merge(incoming)),
            Err(reason) => {
                self.record_rejection(index, reason.clone());
                Err(reason)
            }
        }
    }

    /// Count a row that failed before it could be decoded.
    pub fn reject(&mut self, reason: RowRejection) {
        let index = self.next_index();
        self.record_rejection(index, reason);
    }

    /// Add every decoded (or undecodable) row of a batch.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = Result<InputRow, RowRejection>>) {
        for row in rows {
            match row {
                Ok(row) => self.push_inner(row),
                Err(reason) => self.reject(reason),
            }
        }
    }

    /// Number of distinct addresses aggregated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> AggregatedBatch {
        let entries: Vec<IncomingEntry> = self.entries.into_values().collect();
        let report = IngestReport {
            rows: self.rows,
            accepted: self.accepted,
            rejected: self.rejected,
            unique_addresses: entries.len(),
            touched_token_ids: touched_token_ids(&entries),
            ..Default::default()
        };

        debug!(
            rows = report.rows,
            accepted = report.accepted,
            rejected = report.rejected.len(),
            unique = report.unique_addresses,
            "aggregated ingestion batch"
        );

        AggregatedBatch { entries, report }
    }

    /// Like [`push`](Self::push), for callers that only read the report.
    fn push_inner(&mut self, row: InputRow) {
        let index = self.next_index();
        match validate(row) {
            Ok(incoming) => {
                self.merge(incoming);
            }
            Err(reason) => self.record_rejection(index, reason),
        }
    }

    fn next_index(&mut self) -> usize {
        let index = self.rows;
        self.rows += 1;
        index
    }

    fn merge(&mut self, incoming: IncomingEntry) -> Address {
        let address = incoming.address;
        let merged = match self.entries.remove(&address) {
            Some(existing) => self.policy.combine(existing, incoming),
            None => incoming,
        };
        self.entries.insert(address, merged);
        self.accepted += 1;
        address
    }

    fn record_rejection(&mut self, index: usize, reason: RowRejection) {
        warn!(row = index, %reason, "skipping ingestion row");
        self.rejected.push(Rejected { index, reason });
    }
}

/// An aggregated batch, ordered by address, ready to be written in chunks.
#[derive(Debug, Clone, Default)]
pub struct AggregatedBatch {
    pub entries: Vec<IncomingEntry>,
    pub report: IngestReport,
}

impl AggregatedBatch {
    /// Aggregate a whole batch in one call.
    pub fn from_rows(
        policy: MergePolicy,
        rows: impl IntoIterator<Item = Result<InputRow, RowRejection>>,
    ) -> Self {
        let mut aggregator = Aggregator::new(policy);
        aggregator.extend(rows);
        aggregator.finish()
    }

    /// Fixed-size slices for the store adapter. A zero size is treated as one.
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, IncomingEntry> {
        self.entries.chunks(chunk_size.max(1))
    }
}

fn validate(row: InputRow) -> Result<IncomingEntry, RowRejection> {
    let address = normalize(&row.address).ok_or(RowRejection::InvalidAddress(row.address))?;

    let token_ids = match row.token_ids {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(RowRejection::MissingTokenIds(address)),
    };

    let source = match row.source.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(tag) => Some(tag.parse::<Source>().map_err(|_| RowRejection::UnknownSource {
            address,
            tag: tag.to_string(),
        })?),
    };

    let note = row.note.filter(|note| !note.trim().is_empty());

    Ok(IncomingEntry {
        address,
        token_ids: token_ids.into_iter().collect(),
        source,
        note,
    })
}
