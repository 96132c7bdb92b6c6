//! Versioned schema migrations.
//!
//! The applied version lives in SQLite's `user_version` header field.  Each
//! migration runs in its own transaction together with the version bump, so
//! a failed step leaves the schema at the previous version.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Schema steps, in order.  Step `i` moves the schema to version `i + 1`.
const STEPS: &[(&str, &str)] = &[
    (
        "key/value blobs for workflow state, context, history and snapshots",
        "CREATE TABLE kv_entries (
             key        TEXT PRIMARY KEY,
             value      TEXT NOT NULL,
             updated_at INTEGER NOT NULL
         );",
    ),
    (
        "index entries by last update",
        "CREATE INDEX idx_kv_entries_updated ON kv_entries(updated_at);",
    ),
];

/// The version a fully migrated database reports.
pub const LATEST_VERSION: u32 = STEPS.len() as u32;

/// Bring `conn` up to [`LATEST_VERSION`].  Blocking; run off the runtime.
pub fn migrate(conn: &Connection) -> StoreResult<u32> {
    let current = schema_version(conn)?;
    if current >= LATEST_VERSION {
        debug!(version = current, "schema up to date");
        return Ok(current);
    }

    for (index, (description, sql)) in STEPS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        info!(version, description, "applying migration");
        apply(conn, version, sql).map_err(|source| StoreError::Migration { version, source })?;
    }

    info!(from = current, to = LATEST_VERSION, "schema migrated");
    Ok(LATEST_VERSION)
}

/// The schema version recorded in the database header.
pub fn schema_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn apply(conn: &Connection, version: u32, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()
}
