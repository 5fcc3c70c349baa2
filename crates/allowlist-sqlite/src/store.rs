//! SQLite storage backend implementing AllowlistStore and RootStore

use std::path::Path;

use allowlist_core::storage::{AllowlistStore, RootStore, StoreResult, UpsertStats};
use allowlist_core::{
    normalize, Address, AllowlistEntry, Hash, IncomingEntry, MergePolicy, Source, SourceFilter,
    TokenId,
};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::json::{deserialize_token_ids, now_sql, root_to_sql, serialize_token_ids, sql_to_root};

const SELECT_ENTRY: &str =
    "SELECT address, token_ids, source, note FROM allowlist_entries WHERE address = ?";

const UPSERT_ENTRY: &str = "INSERT INTO allowlist_entries (address, token_ids, source, note, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
     ON CONFLICT(address) DO UPDATE SET
         token_ids = excluded.token_ids,
         source = excluded.source,
         note = excluded.note,
         updated_at = excluded.updated_at";

/// SQLite-backed allowlist and root store
///
/// The connection sits behind a mutex so the store can be shared across
/// blocking worker threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store from a connection
    ///
    /// Applies any pending migrations.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::migrate::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Create a new file-backed SQLite store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened allowlist database");
        Self::new(conn)
    }

    fn upsert_chunk(&self, entries: &[IncomingEntry], policy: &MergePolicy) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_sql();

        {
            let mut select = tx.prepare_cached(SELECT_ENTRY)?;
            let mut upsert = tx.prepare_cached(UPSERT_ENTRY)?;

            for incoming in entries {
                let key = incoming.address.to_string();
                let current = select.query_row([&key], read_row).optional()?;
                let current = current.map(decode_row).transpose()?;

                let merged = policy.apply(current.as_ref(), incoming);
                match &current {
                    None => stats.created += 1,
                    Some(existing) if *existing == merged => {
                        stats.unchanged += 1;
                        continue;
                    }
                    Some(_) => stats.updated += 1,
                }

                upsert.execute(params![
                    key,
                    serialize_token_ids(&merged.token_ids)?,
                    merged.source.as_str(),
                    merged.note,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    fn get_entry(&self, address: &Address) -> Result<Option<AllowlistEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(SELECT_ENTRY)?
            .query_row([address.to_string()], read_row)
            .optional()?;
        row.map(decode_row).transpose()
    }

    fn scan_addresses(&self, token_id: TokenId, filter: &SourceFilter) -> Result<Vec<Address>> {
        let mut sql = String::from(
            "SELECT e.address FROM allowlist_entries e
             WHERE EXISTS (SELECT 1 FROM json_each(e.token_ids) WHERE json_each.value = ?)",
        );
        let mut values = vec![Value::Integer(i64::from(token_id))];

        if let Some(sources) = filter.sources() {
            let placeholders = vec!["?"; sources.len()].join(", ");
            sql.push_str(&format!(" AND e.source IN ({})", placeholders));
            values.extend(sources.iter().map(|s| Value::Text(s.as_str().to_string())));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let addresses = rows
            .map(|raw| decode_address(&raw?))
            .collect::<Result<Vec<_>>>()?;
        Ok(addresses)
    }

    fn delete_entry(&self, address: &Address) -> Result<bool> {
        let rows = self.conn.lock().execute(
            "DELETE FROM allowlist_entries WHERE address = ?",
            [address.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn count_entries(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM allowlist_entries", [], |row| row.get(0))?;
        decode_count(count)
    }

    fn write_root(&self, token_id: TokenId, root: &Hash) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO merkle_roots (token_id, root, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(token_id) DO UPDATE SET root = excluded.root, updated_at = excluded.updated_at",
            params![token_id, root_to_sql(root), now_sql()],
        )?;
        Ok(())
    }

    fn read_root(&self, token_id: TokenId) -> Result<Option<Hash>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT root FROM merkle_roots WHERE token_id = ?",
                [token_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(sql_to_root).transpose()
    }

    fn delete_root(&self, token_id: TokenId) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .execute("DELETE FROM merkle_roots WHERE token_id = ?", [token_id])?;
        Ok(rows > 0)
    }
}

type RawRow = (String, String, String, Option<String>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_row((address, token_ids, source, note): RawRow) -> Result<AllowlistEntry> {
    let source: Source = source
        .parse()
        .map_err(|e| SqliteError::InvalidData(format!("{}", e)))?;

    Ok(AllowlistEntry {
        address: decode_address(&address)?,
        token_ids: deserialize_token_ids(&token_ids)?,
        source,
        note,
    })
}

fn decode_address(raw: &str) -> Result<Address> {
    normalize(raw).ok_or_else(|| SqliteError::InvalidData(format!("Invalid address: {}", raw)))
}

fn decode_count(count: i64) -> Result<usize> {
    usize::try_from(count)
        .map_err(|_| SqliteError::InvalidData(format!("Invalid entry count: {}", count)))
}

impl AllowlistStore for SqliteStore {
    fn bulk_upsert(
        &self,
        entries: &[IncomingEntry],
        policy: &MergePolicy,
    ) -> StoreResult<UpsertStats> {
        Ok(self.upsert_chunk(entries, policy)?)
    }

    fn get(&self, address: &Address) -> StoreResult<Option<AllowlistEntry>> {
        Ok(self.get_entry(address)?)
    }

    fn scan(&self, token_id: TokenId, filter: &SourceFilter) -> StoreResult<Vec<Address>> {
        Ok(self.scan_addresses(token_id, filter)?)
    }

    fn delete(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.delete_entry(address)?)
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.count_entries()?)
    }
}

impl RootStore for SqliteStore {
    fn persist_root(&self, token_id: TokenId, root: &Hash) -> StoreResult<()> {
        Ok(self.write_root(token_id, root)?)
    }

    fn get_persisted_root(&self, token_id: TokenId) -> StoreResult<Option<Hash>> {
        Ok(self.read_root(token_id)?)
    }

    fn clear_root(&self, token_id: TokenId) -> StoreResult<bool> {
        Ok(self.delete_root(token_id)?)
    }
}
