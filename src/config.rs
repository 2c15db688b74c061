// Open options and update policy

use std::time::Duration;

/// Options used when opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// How long to wait for the exclusive file lock (also the SQLite busy timeout)
    pub timeout: Duration,
    /// Permission bits applied when the database file is created (Unix only)
    pub mode: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            mode: 0o600,
        }
    }
}

/// What `update_task` does when the target id has no record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Write the record regardless, creating it at that key if absent.
    #[default]
    Upsert,
    /// Fail with `StoreError::NotFound` and leave the bucket untouched.
    RequireExisting,
}
