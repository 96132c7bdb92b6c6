//! SQLite connection handle.
//!
//! One connection in WAL mode, shared behind a mutex.  Async callers hop
//! onto the blocking pool through [`Database::execute`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Connection settings applied on open.
const PRAGMAS: &[(&str, i64)] = &[
    // 1 = NORMAL; with WAL only the last commit can be lost on power failure.
    ("synchronous", 1),
    // 2 = MEMORY
    ("temp_store", 2),
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheaply cloneable handle to the state database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the file at `path`.  Blocking.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        Self::configure(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");
        Self::configure(Connection::open_in_memory()?)
    }

    /// Open `path` on the blocking pool and migrate it to the latest schema.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let db = tokio::task::spawn_blocking(move || Self::open(path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        let version = self.execute(migration::migrate).await?;
        debug!(version, "database ready");
        Ok(())
    }

    pub async fn schema_version(&self) -> StoreResult<u32> {
        self.execute(migration::schema_version).await
    }

    /// Run `f` with the connection on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }

    fn configure(conn: Connection) -> StoreResult<Self> {
        for &(name, value) in PRAGMAS {
            conn.pragma_update(None, name, value)?;
        }
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_migrates() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().await.unwrap(), 0);

        db.run_migrations().await.unwrap();
        assert_eq!(
            db.schema_version().await.unwrap(),
            migration::LATEST_VERSION
        );

        let rows: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM kv_entries", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn errors_from_the_closure_propagate() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .execute(|conn| Ok(conn.execute_batch("SELECT * FROM missing_table")?))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
