//! Whole-file advisory locking shared between processes and threads.
//!
//! The lock lives on a sidecar file next to the database (see
//! [`lock_path_for`]), never on the database itself: Windows byte-range
//! locks are mandatory and would block reads and writes made through the
//! backend's own handle.
//!
//! OS advisory locks belong to the open file description, not to a thread:
//! two threads locking through the same descriptor would silently convert
//! or release each other's lock. [`FileLock`] therefore keeps a small state
//! machine next to the descriptor so that
//!
//! - concurrent in-process readers share a single OS shared lock, released
//!   by the last reader,
//! - a reader running while this process holds the exclusive lock passes
//!   straight through (the writer already excludes other processes),
//! - the exclusive lock is only requested once no in-process reader holds
//!   the shared one.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long to sleep between attempts on a lock held by another process.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    Shared(usize),
    Exclusive,
}

/// Returns the sidecar lock path for the database at `db_path`.
///
/// `registry.db` is locked through `registry.db.lock`.
#[must_use]
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().map_or_else(Default::default, |n| n.to_os_string());
    name.push(".lock");
    db_path.with_file_name(name)
}

/// An advisory lock over a whole database file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
    state: Mutex<LockState>,
    released: Condvar,
}

impl FileLock {
    /// Opens the lock file at `path`, creating it if missing.
    ///
    /// The file carries no data; only its lock state matters.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            state: Mutex::new(LockState::Unlocked),
            released: Condvar::new(),
        })
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while this process holds the exclusive lock.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        *self.state.lock() == LockState::Exclusive
    }

    /// Acquires shared access, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if another process kept the file exclusively
    /// locked for the whole wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS lock call fails for a reason other than
    /// contention.
    pub fn lock_shared(&self, timeout: Duration) -> StorageResult<Option<SharedLockGuard<'_>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            match *state {
                LockState::Exclusive => {
                    return Ok(Some(SharedLockGuard {
                        lock: self,
                        counted: false,
                    }));
                }
                LockState::Shared(readers) => {
                    *state = LockState::Shared(readers + 1);
                    return Ok(Some(SharedLockGuard {
                        lock: self,
                        counted: true,
                    }));
                }
                LockState::Unlocked => match FileExt::try_lock_shared(&self.file) {
                    Ok(()) => {
                        *state = LockState::Shared(1);
                        return Ok(Some(SharedLockGuard {
                            lock: self,
                            counted: true,
                        }));
                    }
                    Err(e) if is_contended(&e) => {}
                    Err(e) => return Err(e.into()),
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.released
                .wait_for(&mut state, (deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Acquires the exclusive lock, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockState`] if this process already holds the
    /// exclusive lock, or an I/O error from the OS lock call.
    pub fn lock_exclusive(&self) -> StorageResult<()> {
        let mut state = self.state.lock();

        loop {
            match *state {
                LockState::Exclusive => {
                    return Err(StorageError::LockState(
                        "exclusive lock already held by this process".into(),
                    ));
                }
                LockState::Shared(_) => {}
                LockState::Unlocked => match FileExt::try_lock_exclusive(&self.file) {
                    Ok(()) => {
                        *state = LockState::Exclusive;
                        return Ok(());
                    }
                    Err(e) if is_contended(&e) => {}
                    Err(e) => return Err(e.into()),
                },
            }

            self.released.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    /// Releases the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is not held or the OS refuses to
    /// release it. In the latter case the lock is still considered held.
    pub fn unlock_exclusive(&self) -> StorageResult<()> {
        let mut state = self.state.lock();

        if *state != LockState::Exclusive {
            return Err(StorageError::LockState(
                "exclusive lock is not held".into(),
            ));
        }

        FileExt::unlock(&self.file)?;
        *state = LockState::Unlocked;
        self.released.notify_all();
        Ok(())
    }

    fn release_shared(&self) {
        let mut state = self.state.lock();

        match *state {
            LockState::Shared(1) => {
                if let Err(e) = FileExt::unlock(&self.file) {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to release shared lock");
                }
                *state = LockState::Unlocked;
                self.released.notify_all();
            }
            LockState::Shared(readers) => *state = LockState::Shared(readers - 1),
            LockState::Unlocked | LockState::Exclusive => {}
        }
    }
}

/// Shared access to a [`FileLock`], released on drop.
#[derive(Debug)]
pub struct SharedLockGuard<'a> {
    lock: &'a FileLock,
    counted: bool,
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        if self.counted {
            self.lock.release_shared();
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
