//! Error types for the tabpilot-store crate.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored blob is not valid JSON, or a value could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema migration to v{version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The connection lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}
