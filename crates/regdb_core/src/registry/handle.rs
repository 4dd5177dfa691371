//! Reference-counted access to a shared registry database.

use super::store::RegistryStore;
use crate::config::Config;
use crate::error::RegistryResult;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

struct OpenState {
    store: Option<Arc<RegistryStore>>,
    refcount: usize,
}

struct ContextInner {
    path: PathBuf,
    config: Config,
    state: Mutex<OpenState>,
}

/// Shared entry point to one registry database file.
///
/// Cloning is cheap and clones share the open state. The first
/// [`RegistryContext::open`] opens and initializes the database; later
/// opens reuse it. The database is closed when the last
/// [`RegistryHandle`] goes away.
///
/// # Example
///
/// ```no_run
/// use regdb_core::{Config, RegistryContext};
///
/// let ctx = RegistryContext::new("/var/lib/samba/registry.db", Config::default());
/// let handle = ctx.open().unwrap();
/// let shares = handle
///     .fetch_subkeys(r"HKLM\SYSTEM\CurrentControlSet\Services\LanmanServer\Shares")
///     .unwrap();
/// println!("{} shares", shares.len());
/// ctx.close(handle);
/// ```
#[derive(Clone)]
pub struct RegistryContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for RegistryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryContext")
            .field("path", &self.inner.path)
            .field("refcount", &self.refcount())
            .finish()
    }
}

impl RegistryContext {
    /// Creates a context for the database at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                path: path.into(),
                config,
                state: Mutex::new(OpenState {
                    store: None,
                    refcount: 0,
                }),
            }),
        }
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the configuration used when opening.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Opens the database, or takes another reference to it if it is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the first open fails to open or initialize the
    /// database. The context then stays closed.
    pub fn open(&self) -> RegistryResult<RegistryHandle> {
        let mut state = self.inner.state.lock();

        let store = match &state.store {
            Some(store) => Arc::clone(store),
            None => {
                let store = Arc::new(RegistryStore::open(
                    &self.inner.path,
                    self.inner.config.clone(),
                )?);
                state.store = Some(Arc::clone(&store));
                store
            }
        };
        state.refcount += 1;
        debug!(
            path = %self.inner.path.display(),
            refcount = state.refcount,
            "registry opened"
        );

        Ok(RegistryHandle {
            store,
            context: self.clone(),
        })
    }

    /// Releases a handle. Equivalent to dropping it.
    pub fn close(&self, handle: RegistryHandle) {
        drop(handle);
    }

    /// Returns the number of live handles.
    #[must_use]
    pub fn refcount(&self) -> usize {
        self.inner.state.lock().refcount
    }

    /// Returns true while at least one handle is live.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().store.is_some()
    }

    fn release(&self) {
        let mut state = self.inner.state.lock();
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            state.store = None;
            debug!(path = %self.inner.path.display(), "registry closed");
        } else {
            debug!(refcount = state.refcount, "registry reference released");
        }
    }
}

/// A counted reference to an open registry database.
///
/// Dereferences to [`RegistryStore`]. Cloning takes another reference.
pub struct RegistryHandle {
    store: Arc<RegistryStore>,
    context: RegistryContext,
}

impl RegistryHandle {
    /// Returns the context this handle belongs to.
    #[must_use]
    pub fn context(&self) -> &RegistryContext {
        &self.context
    }
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("path", &self.context.path())
            .finish_non_exhaustive()
    }
}

impl Deref for RegistryHandle {
    type Target = RegistryStore;

    fn deref(&self) -> &RegistryStore {
        &self.store
    }
}

impl Clone for RegistryHandle {
    fn clone(&self) -> Self {
        self.context.inner.state.lock().refcount += 1;
        Self {
            store: Arc::clone(&self.store),
            context: self.context.clone(),
        }
    }
}

impl Drop for RegistryHandle {
    fn drop(&mut self) {
        self.context.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubkeyList;
    use tempfile::tempdir;

    #[test]
    fn refcount_follows_handles() {
        let dir = tempdir().unwrap();
        let ctx = RegistryContext::new(dir.path().join("registry.db"), Config::default());
        assert!(!ctx.is_open());

        let first = ctx.open().unwrap();
        let second = ctx.open().unwrap();
        let third = second.clone();
        assert_eq!(ctx.refcount(), 3);

        ctx.close(first);
        drop(third);
        assert_eq!(ctx.refcount(), 1);
        assert!(ctx.is_open());

        ctx.close(second);
        assert_eq!(ctx.refcount(), 0);
        assert!(!ctx.is_open());
    }

    #[test]
    fn handles_share_one_store() {
        let dir = tempdir().unwrap();
        let ctx = RegistryContext::new(dir.path().join("registry.db"), Config::default());

        let a = ctx.open().unwrap();
        let b = ctx.open().unwrap();
        a.store_subkeys("HKLM", &SubkeyList::from_names(["SOFTWARE", "SYSTEM", "NEW"]))
            .unwrap();
        assert!(b.key_exists(r"HKLM\NEW").unwrap());
        assert!(std::ptr::eq(a.engine(), b.engine()));
    }

    #[test]
    fn failed_open_leaves_context_closed() {
        let dir = tempdir().unwrap();
        let config = Config::default().create_if_missing(false);
        let ctx = RegistryContext::new(dir.path().join("missing.db"), config);

        assert!(ctx.open().is_err());
        assert_eq!(ctx.refcount(), 0);
        assert!(!ctx.is_open());
    }

    #[test]
    fn reopen_after_close_sees_data() {
        let dir = tempdir().unwrap();
        let ctx = RegistryContext::new(dir.path().join("registry.db"), Config::default());

        let handle = ctx.open().unwrap();
        handle.store_subkeys("HKCR", &SubkeyList::from_names([".txt"])).unwrap();
        ctx.close(handle);

        let handle = ctx.open().unwrap();
        assert_eq!(handle.fetch_subkeys("HKCR").unwrap().names(), [".txt"]);
    }
}
