//! History store errors. Always surfaced to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(String),
    #[error("history lock poisoned")]
    Poisoned,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
