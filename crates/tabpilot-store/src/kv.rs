//! Key/value persistence for workflow blobs.
//!
//! The state tracker only needs four operations over opaque JSON values:
//! `get`, `set`, `delete`, and `list` by key prefix.  [`KvStore`] captures
//! that contract so the in-memory and SQLite backends are interchangeable
//! without touching orchestration logic.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Trait
// ═══════════════════════════════════════════════════════════════════════

/// A repository of opaque JSON blobs keyed by string.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace the value stored under `key`.
    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Remove `key`.  Returns whether a value was present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List every key starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// ═══════════════════════════════════════════════════════════════════════
//  In-memory backend
// ═══════════════════════════════════════════════════════════════════════

/// Process-local [`KvStore`] backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Poisoned
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SQLite backend
// ═══════════════════════════════════════════════════════════════════════

/// Durable [`KvStore`] over the `kv_entries` table.
///
/// Values are stored as JSON text.  The database must have been migrated
/// (see [`Database::open_and_migrate`]).
#[derive(Clone)]
pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    /// Create a new store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the total number of stored entries.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                );
                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await?;

        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: String::new(),
                reason: "must not be empty",
            });
        }
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    rusqlite::params![key, text, now],
                )?;
                debug!(key = %key, "kv entry written");
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM kv_entries WHERE key = ?1", rusqlite::params![key])?;
                Ok(deleted > 0)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.db
            .execute(move |conn| {
                // substr() instead of LIKE so `_` and `%` in keys are literal.
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv_entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(rusqlite::params![prefix], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
