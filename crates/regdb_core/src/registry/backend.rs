//! Pluggable registry backends and path-prefix dispatch.

use super::path::normalize;
use super::store::RegistryStore;
use super::subkeys::SubkeyList;
use super::values::ValueList;
use crate::error::RegistryResult;
use regdb_codec::SecurityDescriptor;
use std::fmt;
use std::sync::Arc;

/// Storage for some part of the registry tree.
///
/// [`RegistryStore`] implements it for the database. Other implementations
/// can serve overlays for particular subtrees; a [`BackendTable`] routes
/// each path to the right one.
pub trait RegistryBackend: Send + Sync {
    /// Reads the subkeys of `path`.
    fn fetch_subkeys(&self, path: &str) -> RegistryResult<SubkeyList>;

    /// Replaces the subkeys of `path`.
    fn store_subkeys(&self, path: &str, subkeys: &SubkeyList) -> RegistryResult<()>;

    /// Reads the values of `path`.
    fn fetch_values(&self, path: &str) -> RegistryResult<ValueList>;

    /// Replaces the values of `path`.
    fn store_values(&self, path: &str, values: &ValueList) -> RegistryResult<()>;

    /// Reads the security descriptor of `path`.
    fn get_security_descriptor(&self, path: &str) -> RegistryResult<SecurityDescriptor>;

    /// Stores or (with `None`) removes the security descriptor of `path`.
    fn set_security_descriptor(
        &self,
        path: &str,
        descriptor: Option<&SecurityDescriptor>,
    ) -> RegistryResult<()>;

    /// Returns true if `subkeys`, read from `path`, may be out of date.
    fn subkeys_stale(&self, path: &str, subkeys: &SubkeyList) -> bool;

    /// Returns true if `values`, read from `path`, may be out of date.
    fn values_stale(&self, path: &str, values: &ValueList) -> bool;

    /// Returns true if the key at `path` exists.
    fn key_exists(&self, path: &str) -> RegistryResult<bool>;
}

impl RegistryBackend for RegistryStore {
    fn fetch_subkeys(&self, path: &str) -> RegistryResult<SubkeyList> {
        RegistryStore::fetch_subkeys(self, path)
    }

    fn store_subkeys(&self, path: &str, subkeys: &SubkeyList) -> RegistryResult<()> {
        RegistryStore::store_subkeys(self, path, subkeys)
    }

    fn fetch_values(&self, path: &str) -> RegistryResult<ValueList> {
        RegistryStore::fetch_values(self, path)
    }

    fn store_values(&self, path: &str, values: &ValueList) -> RegistryResult<()> {
        RegistryStore::store_values(self, path, values)
    }

    fn get_security_descriptor(&self, path: &str) -> RegistryResult<SecurityDescriptor> {
        RegistryStore::get_security_descriptor(self, path)
    }

    fn set_security_descriptor(
        &self,
        path: &str,
        descriptor: Option<&SecurityDescriptor>,
    ) -> RegistryResult<()> {
        RegistryStore::set_security_descriptor(self, path, descriptor)
    }

    fn subkeys_stale(&self, _path: &str, subkeys: &SubkeyList) -> bool {
        RegistryStore::subkeys_stale(self, subkeys)
    }

    fn values_stale(&self, _path: &str, values: &ValueList) -> bool {
        RegistryStore::values_stale(self, values)
    }

    fn key_exists(&self, path: &str) -> RegistryResult<bool> {
        RegistryStore::key_exists(self, path)
    }
}

/// Routes registry paths to backends by longest matching prefix.
///
/// A prefix matches a path equal to it or below it on a component
/// boundary: `HKLM\SOFTWARE` matches `hklm\software\x` but not
/// `HKLM\SOFTWAREX`. Paths no prefix matches go to the default backend.
#[derive(Clone)]
pub struct BackendTable {
    entries: Vec<(String, Arc<dyn RegistryBackend>)>,
    default: Arc<dyn RegistryBackend>,
}

impl fmt::Debug for BackendTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTable")
            .field("prefixes", &self.prefixes())
            .finish_non_exhaustive()
    }
}

impl BackendTable {
    /// Creates a table that sends every path to `default`.
    pub fn new(default: Arc<dyn RegistryBackend>) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    /// Routes `prefix` and everything below it to `backend`.
    ///
    /// Registering a prefix again replaces its backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RegistryError::InvalidParam`] for an empty prefix.
    pub fn register(
        &mut self,
        prefix: &str,
        backend: Arc<dyn RegistryBackend>,
    ) -> RegistryResult<()> {
        let prefix = normalize(prefix)?.trim_end_matches('/').to_string();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = backend,
            None => self.entries.push((prefix, backend)),
        }
        Ok(())
    }

    /// Returns the registered prefixes in storage form.
    #[must_use]
    pub fn prefixes(&self) -> Vec<&str> {
        self.entries.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// Returns the backend responsible for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RegistryError::InvalidParam`] for an empty path.
    pub fn backend_for(&self, path: &str) -> RegistryResult<&Arc<dyn RegistryBackend>> {
        let key = normalize(path)?;
        Ok(self
            .entries
            .iter()
            .filter(|(prefix, _)| {
                key == *prefix
                    || (key.starts_with(prefix.as_str())
                        && key.as_bytes().get(prefix.len()) == Some(&b'/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(&self.default, |(_, backend)| backend))
    }
}

impl RegistryBackend for BackendTable {
    fn fetch_subkeys(&self, path: &str) -> RegistryResult<SubkeyList> {
        self.backend_for(path)?.fetch_subkeys(path)
    }

    fn store_subkeys(&self, path: &str, subkeys: &SubkeyList) -> RegistryResult<()> {
        self.backend_for(path)?.store_subkeys(path, subkeys)
    }

    fn fetch_values(&self, path: &str) -> RegistryResult<ValueList> {
        self.backend_for(path)?.fetch_values(path)
    }

    fn store_values(&self, path: &str, values: &ValueList) -> RegistryResult<()> {
        self.backend_for(path)?.store_values(path, values)
    }

    fn get_security_descriptor(&self, path: &str) -> RegistryResult<SecurityDescriptor> {
        self.backend_for(path)?.get_security_descriptor(path)
    }

    fn set_security_descriptor(
        &self,
        path: &str,
        descriptor: Option<&SecurityDescriptor>,
    ) -> RegistryResult<()> {
        self.backend_for(path)?
            .set_security_descriptor(path, descriptor)
    }

    fn subkeys_stale(&self, path: &str, subkeys: &SubkeyList) -> bool {
        self.backend_for(path)
            .map_or(true, |backend| backend.subkeys_stale(path, subkeys))
    }

    fn values_stale(&self, path: &str, values: &ValueList) -> bool {
        self.backend_for(path)
            .map_or(true, |backend| backend.values_stale(path, values))
    }

    fn key_exists(&self, path: &str) -> RegistryResult<bool> {
        self.backend_for(path)?.key_exists(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::values::ValueData;

    fn store() -> Arc<RegistryStore> {
        Arc::new(RegistryStore::open_in_memory(Config::new().seed_builtins(false)).unwrap())
    }

    #[test]
    fn longest_prefix_wins() {
        let default = store();
        let software = store();
        let samba = store();

        let mut table = BackendTable::new(default.clone());
        table.register(r"HKLM\SOFTWARE", software.clone()).unwrap();
        table.register(r"hklm\software\samba\", samba.clone()).unwrap();
        assert_eq!(table.prefixes(), ["HKLM/SOFTWARE", "HKLM/SOFTWARE/SAMBA"]);

        let mut values = ValueList::new();
        values.set("v", &ValueData::Dword(1));
        table.store_values(r"HKLM\SOFTWARE\Samba\smbconf", &values).unwrap();
        table.store_values(r"HKLM\SOFTWARE\Other", &values).unwrap();
        table.store_values(r"HKLM\SOFTWAREX", &values).unwrap();

        assert_eq!(samba.fetch_values(r"HKLM\SOFTWARE\Samba\smbconf").unwrap().len(), 1);
        assert_eq!(software.fetch_values(r"HKLM\SOFTWARE\Other").unwrap().len(), 1);
        assert_eq!(default.fetch_values(r"HKLM\SOFTWAREX").unwrap().len(), 1);
        assert!(default.fetch_values(r"HKLM\SOFTWARE\Other").unwrap().is_empty());
    }

    #[test]
    fn exact_prefix_matches() {
        let default = store();
        let overlay = store();
        let mut table = BackendTable::new(default);
        table.register("HKPT", overlay.clone()).unwrap();

        table.store_subkeys("hkpt", &SubkeyList::from_names(["x"])).unwrap();
        assert!(overlay.key_exists("HKPT").unwrap());
        assert!(table.key_exists("HKPT").unwrap());
    }

    #[test]
    fn reregistering_replaces_backend() {
        let mut table = BackendTable::new(store());
        let first = store();
        let second = store();
        table.register("HKU", first).unwrap();
        table.register("hku", second.clone()).unwrap();
        assert_eq!(table.prefixes().len(), 1);

        table.store_subkeys("HKU", &SubkeyList::new()).unwrap();
        assert!(second.key_exists("HKU").unwrap());
        assert!(table.register("", store()).is_err());
    }
}
