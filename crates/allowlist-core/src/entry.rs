//! Allowlist entries, provenance tags and the merge policy.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Identifier of a claimable asset.
pub type TokenId = u32;

/// Provenance category of an allowlist entry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Manual,
    Partner,
    Airdrop,
    Community,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Manual,
        Source::Partner,
        Source::Airdrop,
        Source::Community,
    ];

    /// Lowercase tag used in storage and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Manual => "manual",
            Source::Partner => "partner",
            Source::Airdrop => "airdrop",
            Source::Community => "community",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provenance tag is not one of [`Source::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source: {0:?}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Deployment-wide visibility filter over provenance tags.
///
/// Applied identically by membership checks and by commitment building.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SourceFilter {
    /// Every source counts.
    #[default]
    Unrestricted,
    /// Only the listed sources count.
    Only(BTreeSet<Source>),
}

impl SourceFilter {
    /// Build a filter from configuration tags.
    ///
    /// Tags are trimmed and matched case-insensitively; unknown and empty
    /// tags are ignored. If nothing valid remains the filter is unrestricted.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        let sources: BTreeSet<Source> = tags
            .into_iter()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .filter_map(|tag| tag.parse().ok())
            .collect();

        if sources.is_empty() {
            SourceFilter::Unrestricted
        } else {
            SourceFilter::Only(sources)
        }
    }

    /// Parse a comma separated list such as `"partner, airdrop"`.
    pub fn parse_list(raw: &str) -> Self {
        Self::from_tags(raw.split(','))
    }

    pub fn allows(&self, source: Source) -> bool {
        match self {
            SourceFilter::Unrestricted => true,
            SourceFilter::Only(sources) => sources.contains(&source),
        }
    }

    /// The allowed sources, or `None` when unrestricted.
    pub fn sources(&self) -> Option<&BTreeSet<Source>> {
        match self {
            SourceFilter::Unrestricted => None,
            SourceFilter::Only(sources) => Some(sources),
        }
    }
}

/// A stored allowlist record: one per canonical address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub address: Address,
    /// Ascending and duplicate-free.
    pub token_ids: Vec<TokenId>,
    pub source: Source,
    pub note: Option<String>,
}

impl AllowlistEntry {
    pub fn contains(&self, token_id: TokenId) -> bool {
        self.token_ids.binary_search(&token_id).is_ok()
    }
}

/// An aggregated ingestion record waiting to be merged into the store.
///
/// Unlike [`AllowlistEntry`], the source is optional: the default category
/// is only applied when the address is first created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEntry {
    pub address: Address,
    pub token_ids: BTreeSet<TokenId>,
    pub source: Option<Source>,
    pub note: Option<String>,
}

impl IncomingEntry {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            token_ids: BTreeSet::new(),
            source: None,
            note: None,
        }
    }
}

/// How an incoming source interacts with one already recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourcePolicy {
    /// The first non-empty source ever observed wins.
    #[default]
    KeepFirst,
    /// An explicitly supplied source overwrites the recorded one.
    Replace,
}

/// The aggregation rule for repeated addresses.
///
/// Token ids are always unioned and the first non-empty note always wins;
/// the source follows [`SourcePolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergePolicy {
    pub default_source: Source,
    pub source: SourcePolicy,
}

impl MergePolicy {
    /// Fold a later row for the same address into an earlier one.
    pub fn combine(&self, mut existing: IncomingEntry, incoming: IncomingEntry) -> IncomingEntry {
        debug_assert_eq!(existing.address, incoming.address);

        existing.token_ids.extend(incoming.token_ids);
        existing.source = self.pick_source(existing.source, incoming.source);
        if existing.note.is_none() {
            existing.note = incoming.note;
        }
        existing
    }

    /// Merge an incoming record with the stored entry, if any.
    pub fn apply(
        &self,
        existing: Option<&AllowlistEntry>,
        incoming: &IncomingEntry,
    ) -> AllowlistEntry {
        match existing {
            None => AllowlistEntry {
                address: incoming.address,
                token_ids: incoming.token_ids.iter().copied().collect(),
                source: incoming.source.unwrap_or(self.default_source),
                note: incoming.note.clone(),
            },
            Some(current) => {
                let token_ids: BTreeSet<TokenId> = current
                    .token_ids
                    .iter()
                    .chain(incoming.token_ids.iter())
                    .copied()
                    .collect();

                AllowlistEntry {
                    address: current.address,
                    token_ids: token_ids.into_iter().collect(),
                    source: self
                        .pick_source(Some(current.source), incoming.source)
                        .unwrap_or(current.source),
                    note: current.note.clone().or_else(|| incoming.note.clone()),
                }
            }
        }
    }

    fn pick_source(&self, current: Option<Source>, incoming: Option<Source>) -> Option<Source> {
        match self.source {
            SourcePolicy::KeepFirst => current.or(incoming),
            SourcePolicy::Replace => incoming.or(current),
        }
    }
}

/// Every token id touched by a set of incoming records.
pub fn touched_token_ids<'a>(entries: impl IntoIterator<Item = &'a IncomingEntry>) -> Vec<TokenId> {
    let ids: BTreeSet<TokenId> = entries
        .into_iter()
        .flat_map(|entry| entry.token_ids.iter().copied())
        .collect();
    ids.into_iter().collect()
}
