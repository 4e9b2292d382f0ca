use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown call history id: {0}")]
    InvalidReference(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Storage is not initialized or already closed")]
    Closed,
}
