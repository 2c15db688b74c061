// Error types for the task store

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the engine and the task operations.
///
/// Nothing in this crate retries or swallows these; every failure is handed
/// straight back to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be created or opened.
    #[error("Failed to open database {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Another handle holds the file lock and did not release it in time.
    #[error("Timed out after {timeout:?} waiting for lock on {path:?}")]
    Locked { path: PathBuf, timeout: Duration },

    /// The named bucket could not be created while initialising the store.
    #[error("Failed to create bucket {name}: {source}")]
    Bucket {
        name: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Invalid bucket name: {0} (must be 1-64 alphanumeric chars with _/-)")]
    InvalidBucketName(String),

    /// A read-write or read-only transaction failed to run or commit.
    #[error("Transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("Write attempted in a read-only transaction")]
    TxNotWritable,

    /// A stored key is not a valid 8-byte big-endian id.
    #[error("Corrupt key: expected 8 bytes, found {0}")]
    CorruptKey(usize),

    /// Only raised when updates are configured to require an existing record.
    #[error("Task not found: {0}")]
    NotFound(u64),
}

/// Result type for task store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
