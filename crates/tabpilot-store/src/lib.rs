//! # tabpilot-store
//!
//! Storage engine for tabpilot.
//!
//! Workflow state is kept in memory while a workflow runs; this crate provides
//! the *durable* side: a small key/value repository of opaque JSON blobs that
//! the state tracker writes through on every mutation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  KvStore trait (get / set / delete / list)│
//! ├───────────────────┬─────────────────────┤
//! │  MemoryKvStore    │  SqliteKvStore       │
//! │  (BTreeMap)       │  (kv_entries table)  │
//! ├───────────────────┴─────────────────────┤
//! │  Database (rusqlite, WAL)                │
//! │  Migrations (user_version, per-step tx)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use tabpilot_store::{Database, KvStore, SqliteKvStore};
//!
//! let db = Database::open_and_migrate("data/tabpilot.db").await?;
//! let kv = SqliteKvStore::new(db);
//! kv.set("workflow:42:state", serde_json::json!({"status": "running"})).await?;
//! ```

pub mod db;
pub mod error;
pub mod kv;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
