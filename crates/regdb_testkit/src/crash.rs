//! Crash simulation for the storage engine.
//!
//! [`CrashingBackend`] wraps a real backend and, once armed, lets only a
//! given number of further bytes reach it. The append that crosses the
//! limit is written partially and every later write fails, as if the
//! writing process had died mid-commit. Whatever reached the inner
//! backend stays there for a fresh engine to recover from.
//!
//! [`CrashSwitch::refuse_syncs`] models a disk that rejects `sync` without
//! the writer dying: the failing commit is truncated back and later
//! writes go through again.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use regdb_testkit::crash::CrashingBackend;
//!
//! let backend = CrashingBackend::new(Box::new(FileBackend::open(&path)?));
//! let switch = backend.switch();
//! let engine = StorageEngine::with_backend(Box::new(backend), options)?;
//!
//! switch.arm(10);
//! assert!(engine.store("KEY", b"value").is_err());
//! assert!(switch.has_crashed());
//! ```

use regdb_storage::{StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared control for a [`CrashingBackend`].
#[derive(Debug)]
pub struct CrashSwitch {
    budget: AtomicUsize,
    crashed: AtomicBool,
    refuse_sync: AtomicBool,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            budget: AtomicUsize::new(usize::MAX),
            crashed: AtomicBool::new(false),
            refuse_sync: AtomicBool::new(false),
        }
    }

    /// Lets only `bytes` more bytes through before crashing.
    pub fn arm(&self, bytes: usize) {
        self.budget.store(bytes, Ordering::SeqCst);
    }

    /// Makes every `sync` fail while `refuse` is set.
    pub fn refuse_syncs(&self, refuse: bool) {
        self.refuse_sync.store(refuse, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate a crashing writer.
pub struct CrashingBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashingBackend {
    /// Creates an unarmed wrapper around `inner`.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            switch: Arc::new(CrashSwitch::new()),
        }
    }

    /// Returns the control shared with this backend.
    pub fn switch(&self) -> Arc<CrashSwitch> {
        Arc::clone(&self.switch)
    }

    fn dead(&self, during: &str) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(crash_error(during));
        }
        Ok(())
    }
}

fn crash_error(during: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("simulated crash during {during}"),
    ))
}

impl StorageBackend for CrashingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.dead("append")?;

        let budget = self.switch.budget.load(Ordering::SeqCst);
        if data.len() > budget {
            self.switch.crashed.store(true, Ordering::SeqCst);
            if budget > 0 {
                let _ = self.inner.append(&data[..budget]);
                let _ = self.inner.flush();
            }
            return Err(crash_error("partial append"));
        }

        if budget != usize::MAX {
            self.switch.budget.store(budget - data.len(), Ordering::SeqCst);
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.dead("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.dead("sync")?;
        if self.switch.refuse_sync.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "sync refused",
            )));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.dead("truncate")?;
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regdb_storage::InMemoryBackend;

    #[test]
    fn test_unarmed_passes_through() {
        let mut backend = CrashingBackend::new(Box::new(InMemoryBackend::new()));
        backend.append(b"hello").unwrap();
        backend.truncate(2).unwrap();
        assert_eq!(backend.size().unwrap(), 2);
        assert!(!backend.switch().has_crashed());
    }

    #[test]
    fn test_crash_writes_partial_data() {
        let mut backend = CrashingBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        switch.arm(7);

        backend.append(b"abc").unwrap();
        assert!(backend.append(b"defgh").is_err());
        assert!(switch.has_crashed());
        assert_eq!(backend.read_at(0, 7).unwrap(), b"abcdefg");

        assert!(backend.truncate(0).is_err());
        assert!(backend.append(b"x").is_err());
        assert_eq!(backend.size().unwrap(), 7);
    }

    #[test]
    fn test_refused_sync_is_recoverable() {
        let mut backend = CrashingBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        backend.append(b"abc").unwrap();

        switch.refuse_syncs(true);
        assert!(backend.sync().is_err());
        assert!(!switch.has_crashed());
        backend.truncate(1).unwrap();

        switch.refuse_syncs(false);
        backend.sync().unwrap();
        assert_eq!(backend.read_at(0, 1).unwrap(), b"a");
    }
}
