//! Column encoding helpers for SQLite storage
//!
//! Token id sets live in a JSON array column; roots are `0x`-prefixed hex;
//! timestamps are RFC3339 strings.

use allowlist_core::{merkle, Hash, TokenId};

use crate::error::{Result, SqliteError};

/// Serialize ascending token ids to a JSON array string
pub fn serialize_token_ids(ids: &[TokenId]) -> Result<String> {
    Ok(serde_json::to_string(ids)?)
}

/// Deserialize a JSON array column back into token ids
pub fn deserialize_token_ids(json: &str) -> Result<Vec<TokenId>> {
    Ok(serde_json::from_str(json)?)
}

/// Encode a root for the `merkle_roots.root` column
pub fn root_to_sql(root: &Hash) -> String {
    merkle::to_hex(root)
}

/// Decode a `merkle_roots.root` column value
pub fn sql_to_root(value: &str) -> Result<Hash> {
    merkle::parse_hash(value)
        .ok_or_else(|| SqliteError::InvalidData(format!("Invalid root: {}", value)))
}

/// Current time as an RFC3339 string for `created_at`/`updated_at`
pub fn now_sql() -> String {
    chrono::Utc::now().to_rfc3339()
}
