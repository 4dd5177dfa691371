//! Transactional key/value storage engine.
//!
//! The database is a single append-only log file. Every committed
//! transaction is a run of `Put`/`Delete` records closed by a `Commit`
//! record carrying the new sequence number:
//!
//! ```text
//! | magic "RGLG" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Each engine keeps the committed state as an in-memory index and
//! remembers how many bytes of the log it has applied. Before every read
//! and at the start of every transaction it replays whatever other
//! processes appended since.
//!
//! ## Recovery Policy
//!
//! - Only complete batches (ending in a valid `Commit`) are applied.
//! - A truncated record, a checksum mismatch or a batch without its
//!   `Commit` ends replay. Those bytes are left alone by readers and cut
//!   off by the next writer, which holds the exclusive lock.
//! - A record from a newer format version fails the open with
//!   [`RegistryError::InvalidFormat`] instead of being treated as garbage.
//!
//! ## Locking
//!
//! Readers take the shared file lock with a bounded wait; writers hold the
//! exclusive file lock from `begin` to `commit`/`cancel`. Within a process,
//! one thread at a time owns the transaction and nested `begin` calls by
//! the owner are flattened into the outer transaction.

mod record;
mod transaction;

pub use record::{compute_crc32, Decoded, LogRecord, RecordType, LOG_MAGIC, LOG_VERSION};

use crate::error::{RegistryError, RegistryResult};
use crate::types::SequenceNumber;
use parking_lot::{Condvar, Mutex};
use regdb_storage::{
    lock_path_for, FileBackend, FileLock, InMemoryBackend, SharedLockGuard, StorageBackend,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use transaction::TxState;

/// Engine settings, usually derived from [`crate::Config::engine_options`].
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Create the file if it does not exist.
    pub create_if_missing: bool,
    /// Sync the file after every commit.
    pub sync_on_commit: bool,
    /// Bound on how long a read waits for another process's writer.
    pub read_lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            read_lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a locked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The key exists.
    Found {
        /// Stored bytes.
        data: Vec<u8>,
        /// Sequence number the read observed.
        seqnum: SequenceNumber,
    },
    /// The key does not exist.
    Absent {
        /// Sequence number the read observed.
        seqnum: SequenceNumber,
    },
    /// Another process held the write lock for the whole wait.
    TimedOut,
}

impl ReadOutcome {
    /// Returns the data, treating a timeout as absence.
    #[must_use]
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Self::Found { data, .. } => Some(data),
            Self::Absent { .. } | Self::TimedOut => None,
        }
    }
}

struct EngineState {
    backend: Box<dyn StorageBackend>,
    index: BTreeMap<String, Vec<u8>>,
    applied_len: u64,
    seqnum: SequenceNumber,
}

/// A single-file transactional key/value store.
pub struct StorageEngine {
    path: Option<PathBuf>,
    options: EngineOptions,
    lock: Option<FileLock>,
    state: Mutex<EngineState>,
    txn: Mutex<Option<TxState>>,
    txn_done: Condvar,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Opens the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing and `create_if_missing` is
    /// off, if it cannot be opened or locked, or if it was written by a
    /// newer format version.
    pub fn open(path: &Path, options: EngineOptions) -> RegistryResult<Self> {
        let backend = if options.create_if_missing {
            FileBackend::open_with_create_dirs(path)?
        } else {
            FileBackend::open_existing(path)?
        };
        let lock = FileLock::open(&lock_path_for(path))?;

        let engine = Self::build(Box::new(backend), Some(lock), Some(path.to_path_buf()), options);
        engine.refresh()?;

        debug!(
            path = %path.display(),
            seqnum = engine.cached_seqnum().as_u64(),
            "opened registry database"
        );
        Ok(engine)
    }

    /// Creates an engine that keeps everything in memory.
    #[must_use]
    pub fn open_in_memory(options: EngineOptions) -> Self {
        Self::build(Box::new(InMemoryBackend::new()), None, None, options)
    }

    /// Creates an engine over an arbitrary backend without file locking.
    ///
    /// Existing contents are replayed immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing contents cannot be read or were
    /// written by a newer format version.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        options: EngineOptions,
    ) -> RegistryResult<Self> {
        let engine = Self::build(backend, None, None, options);
        engine.refresh()?;
        Ok(engine)
    }

    fn build(
        backend: Box<dyn StorageBackend>,
        lock: Option<FileLock>,
        path: Option<PathBuf>,
        options: EngineOptions,
    ) -> Self {
        Self {
            path,
            options,
            lock,
            state: Mutex::new(EngineState {
                backend,
                index: BTreeMap::new(),
                applied_len: 0,
                seqnum: SequenceNumber::default(),
            }),
            txn: Mutex::new(None),
            txn_done: Condvar::new(),
        }
    }

    /// Returns the database path, `None` for in-memory engines.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the engine options.
    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Replays records appended by other handles since the last refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared lock cannot be taken within the read
    /// timeout or the log cannot be read.
    pub fn refresh(&self) -> RegistryResult<()> {
        let Some(_guard) = self.read_guard(self.options.read_lock_timeout)? else {
            return Err(RegistryError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for the database read lock",
            )));
        };
        let mut state = self.state.lock();
        Self::catch_up(&mut state)
    }

    /// Returns the sequence number of the last commit.
    ///
    /// Picks up commits from other processes first. If the read lock cannot
    /// be taken in time the last known value is returned.
    #[must_use]
    pub fn current_seqnum(&self) -> SequenceNumber {
        match self.read_guard(self.options.read_lock_timeout) {
            Ok(Some(_guard)) => {
                let mut state = self.state.lock();
                if let Err(e) = Self::catch_up(&mut state) {
                    warn!(error = %e, "failed to refresh sequence number");
                }
                state.seqnum
            }
            Ok(None) => {
                debug!("read lock timed out; using cached sequence number");
                self.cached_seqnum()
            }
            Err(e) => {
                warn!(error = %e, "failed to take read lock for sequence number");
                self.cached_seqnum()
            }
        }
    }

    fn cached_seqnum(&self) -> SequenceNumber {
        self.state.lock().seqnum
    }

    /// Reads a key, waiting at most `timeout` for another process's writer.
    ///
    /// The owner of the current transaction sees its own staged writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn fetch_locked(&self, key: &str, timeout: Duration) -> RegistryResult<ReadOutcome> {
        if let Some(staged) = self.staged(key) {
            let seqnum = self.cached_seqnum();
            return Ok(match staged {
                Some(data) => ReadOutcome::Found { data, seqnum },
                None => ReadOutcome::Absent { seqnum },
            });
        }

        let Some(_guard) = self.read_guard(timeout)? else {
            return Ok(ReadOutcome::TimedOut);
        };
        let mut state = self.state.lock();
        Self::catch_up(&mut state)?;

        let seqnum = state.seqnum;
        Ok(match state.index.get(key) {
            Some(data) => ReadOutcome::Found {
                data: data.clone(),
                seqnum,
            },
            None => ReadOutcome::Absent { seqnum },
        })
    }

    /// Reads a key with the configured timeout. A timeout reads as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn fetch(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        Ok(self
            .fetch_locked(key, self.options.read_lock_timeout)?
            .into_data())
    }

    /// Returns true if the key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn exists(&self, key: &str) -> RegistryResult<bool> {
        Ok(self.fetch(key)?.is_some())
    }

    /// Returns all keys starting with `prefix`, in key order.
    ///
    /// The owner of the current transaction sees its own staged writes. A
    /// lock timeout yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn keys_with_prefix(&self, prefix: &str) -> RegistryResult<Vec<String>> {
        let Some(_guard) = self.read_guard(self.options.read_lock_timeout)? else {
            debug!(prefix, "read lock timed out listing keys");
            return Ok(Vec::new());
        };

        let mut keys: BTreeMap<String, bool> = {
            let mut state = self.state.lock();
            Self::catch_up(&mut state)?;
            state
                .index
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| (k.clone(), true))
                .collect()
        };

        self.with_own_txn(|tx| {
            for (key, write) in tx.writes.range(prefix.to_string()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                keys.insert(key.clone(), write.is_some());
            }
        });

        Ok(keys
            .into_iter()
            .filter_map(|(key, present)| present.then_some(key))
            .collect())
    }

    /// Returns the number of committed keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn len(&self) -> RegistryResult<usize> {
        let _guard = self.read_guard(self.options.read_lock_timeout)?;
        let mut state = self.state.lock();
        Self::catch_up(&mut state)?;
        Ok(state.index.len())
    }

    /// Returns true if no keys are committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn is_empty(&self) -> RegistryResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Stores a value, replacing any previous one.
    ///
    /// Outside a transaction the write is committed on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the implicit transaction fails.
    pub fn store(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        self.with_implicit_txn(|| {
            self.stage(key, Some(value.to_vec()));
            Ok(())
        })
    }

    /// Deletes a key. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the implicit transaction fails.
    pub fn delete(&self, key: &str) -> RegistryResult<()> {
        self.with_implicit_txn(|| {
            self.stage(key, None);
            Ok(())
        })
    }

    /// Deletes `key` and every key nested below it (`key/...`).
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the implicit
    /// transaction fails.
    pub fn delete_tree(&self, key: &str) -> RegistryResult<()> {
        self.with_implicit_txn(|| {
            let nested = self.keys_with_prefix(&format!("{key}/"))?;
            self.stage(key, None);
            for child in nested {
                self.stage(&child, None);
            }
            Ok(())
        })
    }

    fn read_guard(&self, timeout: Duration) -> RegistryResult<Option<Option<SharedLockGuard<'_>>>> {
        match &self.lock {
            Some(lock) => Ok(lock.lock_shared(timeout)?.map(Some)),
            None => Ok(Some(None)),
        }
    }

    /// Applies complete batches appended after `applied_len`.
    fn catch_up(state: &mut EngineState) -> RegistryResult<()> {
        let size = state.backend.size()?;
        if size < state.applied_len {
            return Err(RegistryError::corrupt(format!(
                "database shrank to {size} bytes below {} applied bytes",
                state.applied_len
            )));
        }
        if size == state.applied_len {
            return Ok(());
        }

        let tail_len = usize::try_from(size - state.applied_len)
            .map_err(|_| RegistryError::OutOfMemory)?;
        let tail = state.backend.read_at(state.applied_len, tail_len)?;

        let mut pos = 0;
        let mut committed = 0;
        let mut batch = Vec::new();
        loop {
            match LogRecord::decode(&tail[pos..]) {
                Decoded::Record(LogRecord::Commit { sequence }, len) => {
                    pos += len;
                    for record in batch.drain(..) {
                        match record {
                            LogRecord::Put { key, value } => {
                                state.index.insert(key, value);
                            }
                            LogRecord::Delete { key } => {
                                state.index.remove(&key);
                            }
                            LogRecord::Commit { .. } => {}
                        }
                    }
                    state.seqnum = sequence;
                    committed = pos;
                }
                Decoded::Record(record, len) => {
                    pos += len;
                    batch.push(record);
                }
                Decoded::Incomplete => break,
                Decoded::Corrupt(message) => {
                    debug!(
                        offset = state.applied_len + pos as u64,
                        reason = %message,
                        "stopping replay at invalid record"
                    );
                    break;
                }
                Decoded::Unsupported(version) => {
                    return Err(RegistryError::invalid_format(format!(
                        "log record version {version} at offset {} is newer than {LOG_VERSION}",
                        state.applied_len + pos as u64
                    )));
                }
            }
        }

        state.applied_len += committed as u64;
        Ok(())
    }
}
