// Embedded single-file key/value engine on SQLite
//
// Buckets are named keyspaces with their own sequence counter. Keys and
// values are raw bytes; SQLite compares BLOBs with memcmp, so iteration
// order is key byte order.

use crate::config::Options;
use crate::error::{Result, StoreError};
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction, TransactionBehavior};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A key/value pair read from a bucket
pub type Entry = (Vec<u8>, Vec<u8>);

/// An open database file, exclusively locked for the lifetime of the handle
pub struct Store {
    path: PathBuf,
    db: Connection,
    lock: File,
}

impl Store {
    /// Open or create a store at the given path with default options
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &Options::default())
    }

    /// Open or create a store at the given path
    ///
    /// The database and its `<path>.lock` file are created with `options.mode`
    /// if absent. Fails with `StoreError::Locked` if another handle keeps the
    /// lock for longer than `options.timeout`, and with `StoreError::Open` if
    /// the file is not a usable database.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = ?path, timeout = ?options.timeout, mode = options.mode, "Opening store");

        let lock = create_file(&lock_path(&path), options.mode)?;
        acquire_lock(&lock, &path, options.timeout)?;

        // Only touch the database file ourselves when it does not exist yet:
        // closing a second descriptor on it would drop SQLite's POSIX locks.
        if !path.exists() {
            create_file(&path, options.mode)?;
        }

        let db = Self::connect(&path, options.timeout).map_err(|e| StoreError::Open {
            path: path.clone(),
            source: Box::new(e),
        })?;

        info!(path = ?path, "Store opened");
        Ok(Self { path, db, lock })
    }

    fn connect(path: &Path, timeout: Duration) -> rusqlite::Result<Connection> {
        let db = Connection::open(path)?;
        db.busy_timeout(timeout)?;
        db.pragma_update(None, "journal_mode", "WAL")?;

        debug!("Creating engine schema");
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                name TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS entries (
                bucket TEXT NOT NULL REFERENCES buckets(name),
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key)
            ) WITHOUT ROWID;
            "#,
        )?;

        Ok(db)
    }

    /// Get the path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the database and release the file lock
    ///
    /// Dropping the store does the same; this surfaces any error.
    pub fn close(self) -> Result<()> {
        let Self { path, db, lock } = self;
        db.close().map_err(|(_, e)| StoreError::Transaction(e))?;
        FileExt::unlock(&lock).map_err(|e| StoreError::Open { path: path.clone(), source: Box::new(e) })?;
        debug!(path = ?path, "Store closed");
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `f` inside a read-write transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    /// Writers are serialised by taking the SQLite write lock up front.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx<'_>) -> Result<T>,
    {
        let tx = Tx {
            tx: Transaction::new_unchecked(&self.db, TransactionBehavior::Immediate)?,
            writable: true,
        };
        let out = f(&tx)?;
        tx.tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a read-only transaction over a consistent snapshot
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx<'_>) -> Result<T>,
    {
        let tx = Tx {
            tx: Transaction::new_unchecked(&self.db, TransactionBehavior::Deferred)?,
            writable: false,
        };
        let out = f(&tx)?;
        tx.tx.rollback()?;
        Ok(out)
    }
}

/// Handle to an in-progress transaction
pub struct Tx<'conn> {
    tx: Transaction<'conn>,
    writable: bool,
}

impl Tx<'_> {
    /// Create the bucket if it does not exist and return it
    pub fn create_bucket_if_not_exists(&self, name: &str) -> Result<BucketTx<'_>> {
        validate_bucket_name(name)?;
        self.ensure_writable()?;

        let created = self
            .tx
            .execute("INSERT OR IGNORE INTO buckets (name, sequence) VALUES (?1, 0)", [name])?;
        if created > 0 {
            info!(bucket = name, "Created bucket");
        }

        self.bucket(name)
    }

    /// Look up an existing bucket
    pub fn bucket(&self, name: &str) -> Result<BucketTx<'_>> {
        let exists: Option<i64> = self
            .tx
            .query_row("SELECT 1 FROM buckets WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::BucketNotFound(name.to_string()));
        }

        Ok(BucketTx {
            conn: &self.tx,
            name: name.to_string(),
            writable: self.writable,
        })
    }

    /// Names of all buckets, sorted
    pub fn bucket_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.tx.prepare("SELECT name FROM buckets ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable { Ok(()) } else { Err(StoreError::TxNotWritable) }
    }
}

/// A bucket as seen from inside a transaction
pub struct BucketTx<'a> {
    conn: &'a Connection,
    name: String,
    writable: bool,
}

impl<'a> BucketTx<'a> {
    /// Current value of the bucket's sequence counter
    pub fn sequence(&self) -> Result<u64> {
        let seq: i64 = self
            .conn
            .query_row("SELECT sequence FROM buckets WHERE name = ?1", [&self.name], |row| {
                row.get(0)
            })?;
        Ok(seq as u64)
    }

    /// Advance the sequence counter and return the new value
    ///
    /// The advance is part of the transaction: a rollback undoes it.
    pub fn next_sequence(&self) -> Result<u64> {
        self.ensure_writable()?;
        self.conn.execute(
            "UPDATE buckets SET sequence = sequence + 1 WHERE name = ?1",
            [&self.name],
        )?;
        self.sequence()
    }

    /// Store `value` under `key`, replacing any existing value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)",
            rusqlite::params![self.name, key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM entries WHERE bucket = ?1 AND key = ?2",
                rusqlite::params![self.name, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Remove `key` if present; removing a missing key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.conn.execute(
            "DELETE FROM entries WHERE bucket = ?1 AND key = ?2",
            rusqlite::params![self.name, key],
        )?;
        Ok(())
    }

    /// Cursor positioned before the first key
    pub fn cursor(&self) -> Cursor<'a> {
        Cursor {
            conn: self.conn,
            bucket: self.name.clone(),
            position: Position::Start,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable { Ok(()) } else { Err(StoreError::TxNotWritable) }
    }
}

enum Position {
    Start,
    At(Vec<u8>),
    End,
}

/// Ordered iterator over a bucket's entries
///
/// Iterating yields entries in ascending key byte order, starting after the
/// current position.
pub struct Cursor<'a> {
    conn: &'a Connection,
    bucket: String,
    position: Position,
}

impl Cursor<'_> {
    /// Move to the first entry and return it
    pub fn seek_first(&mut self) -> Result<Option<Entry>> {
        self.position = Position::Start;
        self.next().transpose()
    }

    /// Move to the last entry and return it
    pub fn seek_last(&mut self) -> Result<Option<Entry>> {
        let entry = self.fetch(
            "SELECT key, value FROM entries WHERE bucket = ?1 ORDER BY key DESC LIMIT 1",
            rusqlite::params![self.bucket],
        )?;
        Ok(self.settle(entry))
    }

    /// Move to the first entry whose key is `>= key` and return it
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let entry = self.fetch(
            "SELECT key, value FROM entries WHERE bucket = ?1 AND key >= ?2 ORDER BY key LIMIT 1",
            rusqlite::params![self.bucket, key],
        )?;
        Ok(self.settle(entry))
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        let entry = match &self.position {
            Position::Start => self.fetch(
                "SELECT key, value FROM entries WHERE bucket = ?1 ORDER BY key LIMIT 1",
                rusqlite::params![self.bucket],
            )?,
            Position::At(current) => self.fetch(
                "SELECT key, value FROM entries WHERE bucket = ?1 AND key > ?2 ORDER BY key LIMIT 1",
                rusqlite::params![self.bucket, current],
            )?,
            Position::End => None,
        };
        Ok(self.settle(entry))
    }

    fn settle(&mut self, entry: Option<Entry>) -> Option<Entry> {
        self.position = match &entry {
            Some((key, _)) => Position::At(key.clone()),
            None => Position::End,
        };
        entry
    }

    fn fetch(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Option<Entry>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let entry = stmt
            .query_row(params, |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .optional()?;
        Ok(entry)
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.position = Position::End;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn create_file(path: &Path, mode: u32) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    opts.open(path).map_err(|e| StoreError::Open {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

/// Sidecar file carrying the advisory lock, `<path>.lock`
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(file: &File, path: &Path, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) => {
                if started.elapsed() >= timeout {
                    debug!(path = ?path, error = ?e, "Gave up waiting for lock");
                    return Err(StoreError::Locked {
                        path: path.to_path_buf(),
                        timeout,
                    });
                }
                std::thread::sleep(LOCK_POLL_INTERVAL);
            }
        }
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > 64
        || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::InvalidBucketName(name.to_string()));
    }
    Ok(())
}
