//! Database migration runner
//!
//! Embeds the schema files under `migrations/` and applies the pending ones
//! in version order.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, SqliteError};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "000",
        include_str!("../migrations/000_create_schema_migrations.sql"),
    ),
    (
        "001",
        include_str!("../migrations/001_create_allowlist_entries_table.sql"),
    ),
    (
        "002",
        include_str!("../migrations/002_create_merkle_roots_table.sql"),
    ),
];

/// Apply all pending migrations to the database
///
/// # Errors
///
/// Returns [`SqliteError::Migration`] naming the version that failed.
pub fn migrate(conn: &Connection) -> Result<()> {
    for (version, sql) in MIGRATIONS {
        apply_migration(conn, version, sql)
            .map_err(|e| SqliteError::Migration(format!("{}: {}", version, e)))?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: &str, sql: &str) -> Result<()> {
    if is_migration_applied(conn, version)? {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?, CURRENT_TIMESTAMP)",
        [version],
    )?;
    tx.commit()?;

    debug!(version, "applied migration");
    Ok(())
}

fn is_migration_applied(conn: &Connection, version: &str) -> Result<bool> {
    let table_exists = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")?
        .exists([])?;

    if !table_exists {
        return Ok(false);
    }

    Ok(conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?")?
        .exists([version])?)
}
