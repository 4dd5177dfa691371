//! Test fixtures and registry helpers.
//!
//! Provides temporary registries and a few common trees to run tests
//! against.

use regdb_core::{
    Config, EngineOptions, RegistryContext, RegistryHandle, RegistryResult, RegistryStore,
    StorageEngine, SubkeyList, ValueData, ValueList,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// File name of the database inside a fixture's directory.
pub const REGISTRY_FILE: &str = "registry.db";

/// An on-disk registry in a temporary directory, removed on drop.
pub struct TestRegistry {
    handle: RegistryHandle,
    context: RegistryContext,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestRegistry {
    /// Creates a registry with the builtin keys.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a registry holding only the format version.
    pub fn unseeded() -> Self {
        Self::with_config(Config::default().seed_builtins(false))
    }

    /// Creates a registry with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(REGISTRY_FILE);
        let context = RegistryContext::new(&path, config);
        let handle = context.open().expect("Failed to open registry");

        Self {
            handle,
            context,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the context the fixture's handle came from.
    pub fn context(&self) -> &RegistryContext {
        &self.context
    }

    /// Returns the fixture's open handle.
    pub fn handle(&self) -> &RegistryHandle {
        &self.handle
    }

    /// Opens an independent store on the same file.
    ///
    /// The new store has its own descriptors, index and locks, so it
    /// behaves like a second process sharing the database.
    pub fn open_peer(&self) -> RegistryStore {
        RegistryStore::open(&self.path, self.context.config().clone())
            .expect("Failed to open peer store")
    }

    /// Opens an independent store with a short read-lock timeout.
    pub fn open_impatient_peer(&self, timeout: Duration) -> RegistryStore {
        let config = self.context.config().clone().read_lock_timeout(timeout);
        RegistryStore::open(&self.path, config).expect("Failed to open peer store")
    }

    /// Opens an independent raw engine on the same file.
    pub fn open_peer_engine(&self) -> StorageEngine {
        StorageEngine::open(&self.path, self.context.config().engine_options())
            .expect("Failed to open peer engine")
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestRegistry {
    type Target = RegistryStore;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

/// Creates an in-memory store with the builtin keys.
pub fn memory_store() -> RegistryStore {
    RegistryStore::open_in_memory(Config::default()).expect("Failed to open in-memory registry")
}

/// Creates an empty in-memory store.
pub fn empty_memory_store() -> RegistryStore {
    RegistryStore::open_in_memory(Config::default().seed_builtins(false))
        .expect("Failed to open in-memory registry")
}

/// Creates an in-memory engine with default options.
pub fn memory_engine() -> StorageEngine {
    StorageEngine::open_in_memory(EngineOptions::default())
}

/// Runs a test with a temporary in-memory registry.
///
/// # Example
///
/// ```rust,ignore
/// use regdb_testkit::with_temp_registry;
///
/// #[test]
/// fn my_test() {
///     with_temp_registry(|store| {
///         assert!(store.key_exists("HKLM").unwrap());
///     });
/// }
/// ```
pub fn with_temp_registry<F, R>(f: F) -> R
where
    F: FnOnce(&RegistryStore) -> R,
{
    let store = memory_store();
    f(&store)
}

/// Runs a test with a temporary on-disk registry.
pub fn with_file_registry<F, R>(f: F) -> R
where
    F: FnOnce(&TestRegistry) -> R,
{
    let registry = TestRegistry::new();
    f(&registry)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a tree of `fanout` children per key, `depth` levels below
    /// `root`, each key holding one DWORD value with its depth.
    ///
    /// Returns the number of keys created.
    pub fn populate_tree(
        store: &RegistryStore,
        root: &str,
        depth: usize,
        fanout: usize,
    ) -> RegistryResult<usize> {
        if depth == 0 {
            return Ok(0);
        }

        let names: Vec<String> = (0..fanout).map(|i| format!("Key{i}")).collect();
        store.store_subkeys(root, &SubkeyList::from_names(&names))?;

        let mut created = 0;
        for name in &names {
            let child = format!(r"{root}\{name}");
            let mut values = ValueList::new();
            values.set("Depth", &ValueData::Dword(depth as u32));
            store.store_values(&child, &values)?;
            created += 1 + populate_tree(store, &child, depth - 1, fanout)?;
        }
        Ok(created)
    }

    /// Creates a share definition under the share list key.
    pub fn add_share(store: &RegistryStore, name: &str, path: &str) -> RegistryResult<()> {
        const SHARES: &str = r"HKLM\SYSTEM\CurrentControlSet\Services\LanmanServer\Shares";

        let mut shares = store.fetch_subkeys(SHARES)?;
        shares.add_key(name);
        store.store_subkeys(SHARES, &shares)?;

        let mut values = ValueList::new();
        values.set("path", &ValueData::String(path.to_string()));
        values.set("comment", &ValueData::String(format!("{name} share")));
        store.store_values(&format!(r"{SHARES}\{name}"), &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_registry() {
        let registry = TestRegistry::new();
        assert!(registry.path().exists());
        assert!(registry.key_exists(r"HKLM\SOFTWARE\Samba\smbconf").unwrap());
        assert_eq!(registry.context().refcount(), 1);
    }

    #[test]
    fn test_unseeded_registry() {
        let registry = TestRegistry::unseeded();
        assert!(!registry.key_exists("HKLM").unwrap());
        assert_eq!(registry.format_version().unwrap(), Some(regdb_core::REGVER_V1));
    }

    #[test]
    fn test_peer_sees_writes() {
        let registry = TestRegistry::new();
        let peer = registry.open_peer();
        registry
            .store_subkeys("HKU", &SubkeyList::from_names(["S-1-5-18"]))
            .unwrap();
        assert_eq!(peer.fetch_subkeys("HKU").unwrap().names(), ["S-1-5-18"]);
    }

    #[test]
    fn test_populated_tree() {
        with_temp_registry(|store| {
            let created = scenarios::populate_tree(store, "HKCR", 2, 3).unwrap();
            assert_eq!(created, 3 + 9);
            assert_eq!(store.fetch_subkeys(r"HKCR\Key2").unwrap().len(), 3);
        });
    }

    #[test]
    fn test_add_share() {
        let store = memory_store();
        scenarios::add_share(&store, "data", "/srv/data").unwrap();
        let values = store
            .fetch_values(r"HKLM\SYSTEM\CurrentControlSet\Services\LanmanServer\Shares\data")
            .unwrap();
        assert_eq!(values.len(), 2);
    }
}
