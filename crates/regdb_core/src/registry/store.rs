//! The registry store: subkey lists, value lists and security descriptors
//! on top of the storage engine.

use super::path::{
    secdesc_record_key, subkey_record_key, validate_name, value_record_key, KEY_SEPARATOR,
    REGDB_VERSION_KEY,
};
use super::subkeys::SubkeyList;
use super::values::ValueList;
use crate::config::Config;
use crate::engine::{ReadOutcome, StorageEngine};
use crate::error::{RegistryError, RegistryResult};
use crate::types::SequenceNumber;
use regdb_codec::{
    marshal_sec_desc, pack_subkeys, pack_values, unmarshal_sec_desc, unpack_subkeys,
    unpack_values, SecurityDescriptor,
};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Current database format version.
pub const REGVER_V1: u32 = 1;

/// Registry operations over one open database.
#[derive(Debug)]
pub struct RegistryStore {
    engine: StorageEngine,
    config: Config,
}

impl RegistryStore {
    /// Opens (and if needed creates) the registry database at `path`.
    ///
    /// Writes the format version if it is missing and, unless disabled in
    /// `config`, creates the builtin keys and values, all in a single
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: &Path, config: Config) -> RegistryResult<Self> {
        let engine = StorageEngine::open(path, config.engine_options())?;
        Self::with_engine(engine, config)
    }

    /// Creates a registry that lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn open_in_memory(config: Config) -> RegistryResult<Self> {
        let engine = StorageEngine::open_in_memory(config.engine_options());
        Self::with_engine(engine, config)
    }

    /// Wraps an already opened engine and initializes it.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn with_engine(engine: StorageEngine, config: Config) -> RegistryResult<Self> {
        let store = Self { engine, config };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> RegistryResult<()> {
        self.engine.transaction(|| {
            self.check_version()?;
            if self.config.seed_builtins {
                self.init_registry_data()?;
            }
            Ok(())
        })
    }

    fn check_version(&self) -> RegistryResult<()> {
        match self.format_version()? {
            None => {
                debug!(version = self.config.format_version, "writing database version");
                self.engine.store(
                    REGDB_VERSION_KEY,
                    &self.config.format_version.to_le_bytes(),
                )
            }
            Some(found) if found != self.config.format_version => {
                warn!(
                    found,
                    expected = self.config.format_version,
                    "registry database version mismatch"
                );
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Returns the stored format version, `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Corrupt`] if the stored value is not a
    /// 32-bit integer.
    pub fn format_version(&self) -> RegistryResult<Option<u32>> {
        let Some(bytes) = self.engine.fetch(REGDB_VERSION_KEY)? else {
            return Ok(None);
        };
        let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
            RegistryError::corrupt(format!("version record of {} bytes", bytes.len()))
        })?;
        Ok(Some(u32::from_le_bytes(raw)))
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads the subkeys of `path`.
    ///
    /// A missing key yields an empty list. So does a read that timed out
    /// waiting for another process's transaction; its sequence number is 0
    /// so the list always looks stale.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path or an
    /// engine error.
    pub fn fetch_subkeys(&self, path: &str) -> RegistryResult<SubkeyList> {
        let key = subkey_record_key(path)?;
        Ok(match self.read(&key)? {
            ReadOutcome::Found { data, seqnum } => SubkeyList::with_seqnum(unpack_subkeys(&data), seqnum),
            ReadOutcome::Absent { seqnum } => SubkeyList::with_seqnum(Vec::new(), seqnum),
            ReadOutcome::TimedOut => SubkeyList::new(),
        })
    }

    /// Replaces the subkeys of `path` with `desired`.
    ///
    /// Removed children lose their subkey, value and security-descriptor
    /// records, including everything below them. New children get an empty
    /// subkey record. Nothing is written if the stored list already equals
    /// `desired`. Either every record is updated or none is.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path or an
    /// invalid child name, or the error that aborted the transaction.
    pub fn store_subkeys(&self, path: &str, desired: &SubkeyList) -> RegistryResult<()> {
        let key = subkey_record_key(path)?;
        for name in desired {
            validate_name(name)?;
        }
        let packed = pack_subkeys(desired.names())?;

        let current = self.fetch_subkeys(path)?;
        if current.names() == desired.names()
            && (!desired.is_empty() || self.engine.exists(&key)?)
        {
            trace!(key = %path, "subkey list unchanged");
            return Ok(());
        }

        self.engine.transaction(|| {
            let old = self.fetch_subkeys(path)?;
            self.engine.store(&key, &packed)?;

            for name in old.iter().filter(|name| !desired.contains(name)) {
                let child = child_path(path, name);
                trace!(key = %child, "deleting removed subkey");
                self.engine.delete_tree(&subkey_record_key(&child)?)?;
                if let Err(e) = self.engine.delete_tree(&value_record_key(&child)?) {
                    debug!(key = %child, error = %e, "ignoring failure to delete values");
                }
                if let Err(e) = self.engine.delete_tree(&secdesc_record_key(&child)?) {
                    debug!(key = %child, error = %e, "ignoring failure to delete security descriptor");
                }
            }

            for name in desired {
                let child_key = subkey_record_key(&child_path(path, name))?;
                if !self.engine.exists(&child_key)? {
                    self.engine.store(&child_key, &pack_subkeys::<&str>(&[])?)?;
                }
            }
            Ok(())
        })
    }

    /// Reads the values of `path`.
    ///
    /// A missing key or a timed-out read yields an empty list, as for
    /// [`RegistryStore::fetch_subkeys`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path or an
    /// engine error.
    pub fn fetch_values(&self, path: &str) -> RegistryResult<ValueList> {
        let key = value_record_key(path)?;
        Ok(match self.read(&key)? {
            ReadOutcome::Found { data, seqnum } => ValueList::with_seqnum(unpack_values(&data), seqnum),
            ReadOutcome::Absent { seqnum } => ValueList::with_seqnum(Vec::new(), seqnum),
            ReadOutcome::TimedOut => ValueList::new(),
        })
    }

    /// Replaces the values of `path`.
    ///
    /// Nothing is written if the stored record already has the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path, a codec
    /// error for values that cannot be packed, or an engine error.
    pub fn store_values(&self, path: &str, values: &ValueList) -> RegistryResult<()> {
        let key = value_record_key(path)?;
        let packed = pack_values(values.values())?;

        if self.engine.fetch(&key)?.as_deref() == Some(packed.as_slice()) {
            trace!(key = %path, "value list unchanged");
            return Ok(());
        }

        self.engine.store(&key, &packed)
    }

    /// Reads the security descriptor of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if none is stored and
    /// [`RegistryError::Corrupt`] if the stored bytes cannot be decoded.
    /// The CBOR decoder allocates infallibly, so running out of memory
    /// while decoding aborts the process instead of returning
    /// [`RegistryError::OutOfMemory`].
    pub fn get_security_descriptor(&self, path: &str) -> RegistryResult<SecurityDescriptor> {
        let key = secdesc_record_key(path)?;
        let Some(bytes) = self.engine.fetch(&key)? else {
            return Err(RegistryError::not_found(format!(
                "security descriptor for {path}"
            )));
        };

        unmarshal_sec_desc(&bytes)
            .map_err(|e| RegistryError::corrupt(format!("security descriptor for {path}: {e}")))
    }

    /// Stores the security descriptor of `path`; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path, a codec
    /// error if the descriptor cannot be encoded, or an engine error.
    pub fn set_security_descriptor(
        &self,
        path: &str,
        descriptor: Option<&SecurityDescriptor>,
    ) -> RegistryResult<()> {
        let key = secdesc_record_key(path)?;
        match descriptor {
            None => {
                if self.engine.exists(&key)? {
                    self.engine.delete(&key)?;
                }
                Ok(())
            }
            Some(sd) => self.engine.store(&key, &marshal_sec_desc(sd)?),
        }
    }

    /// Returns the sequence number of the last change to the database.
    #[must_use]
    pub fn current_seqnum(&self) -> SequenceNumber {
        self.engine.current_seqnum()
    }

    /// Returns true if the database changed since `captured` was observed.
    #[must_use]
    pub fn is_stale(&self, captured: SequenceNumber) -> bool {
        captured != self.current_seqnum()
    }

    /// Returns true if the database changed since `subkeys` was read.
    #[must_use]
    pub fn subkeys_stale(&self, subkeys: &SubkeyList) -> bool {
        self.is_stale(subkeys.seqnum())
    }

    /// Returns true if the database changed since `values` was read.
    #[must_use]
    pub fn values_stale(&self, values: &ValueList) -> bool {
        self.is_stale(values.seqnum())
    }

    /// Returns true if `path` has a subkey record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path or an
    /// engine error.
    pub fn key_exists(&self, path: &str) -> RegistryResult<bool> {
        self.engine.exists(&subkey_record_key(path)?)
    }

    fn read(&self, key: &str) -> RegistryResult<ReadOutcome> {
        let outcome = self
            .engine
            .fetch_locked(key, self.config.read_lock_timeout)?;
        if outcome == ReadOutcome::TimedOut {
            debug!(key, "read lock timed out; treating record as empty");
        }
        Ok(outcome)
    }
}

fn child_path(parent: &str, name: &str) -> String {
    format!("{parent}{KEY_SEPARATOR}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::values::ValueData;
    use regdb_codec::{Ace, Acl, Sid, ValueType};

    fn store() -> RegistryStore {
        RegistryStore::open_in_memory(Config::new().seed_builtins(false)).unwrap()
    }

    #[test]
    fn fresh_store_records_version() {
        let store = store();
        assert_eq!(store.format_version().unwrap(), Some(REGVER_V1));
    }

    #[test]
    fn missing_key_reads_empty() {
        let store = store();
        assert!(store.fetch_subkeys(r"HKLM\NOWHERE").unwrap().is_empty());
        assert!(store.fetch_values(r"HKLM\NOWHERE").unwrap().is_empty());
        assert!(!store.key_exists(r"HKLM\NOWHERE").unwrap());
    }

    #[test]
    fn empty_path_is_invalid() {
        let store = store();
        assert!(matches!(
            store.fetch_subkeys(""),
            Err(RegistryError::InvalidParam { .. })
        ));
        assert!(store.store_values("", &ValueList::new()).is_err());
    }

    #[test]
    fn store_then_fetch_subkeys() {
        let store = store();
        let desired = SubkeyList::from_names(["Zeta", "Alpha"]);
        store.store_subkeys(r"HKLM\SOFTWARE", &desired).unwrap();

        let fetched = store.fetch_subkeys(r"hklm\software").unwrap();
        assert_eq!(fetched.names(), ["Zeta", "Alpha"]);
        assert_eq!(fetched.seqnum(), store.current_seqnum());
        assert!(store.key_exists(r"HKLM\SOFTWARE\Zeta").unwrap());
        assert!(store.fetch_subkeys(r"HKLM\SOFTWARE\Alpha").unwrap().is_empty());
    }

    #[test]
    fn identical_subkeys_skip_the_write() {
        let store = store();
        let desired = SubkeyList::from_names(["A"]);
        store.store_subkeys("ROOT", &desired).unwrap();
        let seq = store.current_seqnum();

        store.store_subkeys("ROOT", &desired).unwrap();
        assert_eq!(store.current_seqnum(), seq);

        store.store_subkeys("EMPTY", &SubkeyList::new()).unwrap();
        let seq = store.current_seqnum();
        assert!(store.key_exists("EMPTY").unwrap());
        store.store_subkeys("EMPTY", &SubkeyList::new()).unwrap();
        assert_eq!(store.current_seqnum(), seq);
    }

    #[test]
    fn invalid_child_name_rejected() {
        let store = store();
        let result = store.store_subkeys("ROOT", &SubkeyList::from_names([r"a\b"]));
        assert!(matches!(result, Err(RegistryError::InvalidParam { .. })));
        assert!(!store.key_exists("ROOT").unwrap());
    }

    #[test]
    fn removing_children_deletes_their_records() {
        let store = store();
        store
            .store_subkeys("P", &SubkeyList::from_names(["C", "Keep"]))
            .unwrap();
        store
            .store_subkeys(r"P\C", &SubkeyList::from_names(["G"]))
            .unwrap();

        let mut values = ValueList::new();
        values.set("v", &ValueData::Dword(7));
        store.store_values(r"P\C", &values).unwrap();
        store.store_values(r"P\C\G", &values).unwrap();
        let sd = SecurityDescriptor::new().with_dacl(Acl::new(vec![Ace::allow(Sid::world(), 1)]));
        store.set_security_descriptor(r"P\C", Some(&sd)).unwrap();
        store.set_security_descriptor(r"P\C\G", Some(&sd)).unwrap();

        store
            .store_subkeys("P", &SubkeyList::from_names(["Keep"]))
            .unwrap();

        for gone in [r"P\C", r"P\C\G"] {
            assert!(!store.key_exists(gone).unwrap());
            assert!(store.fetch_values(gone).unwrap().is_empty());
            assert!(store.get_security_descriptor(gone).unwrap_err().is_not_found());
        }
        assert!(store.key_exists(r"P\Keep").unwrap());
    }

    #[test]
    fn emptying_parent_keeps_it_addressable() {
        let store = store();
        store.store_subkeys("P", &SubkeyList::from_names(["C"])).unwrap();
        store.store_subkeys("P", &SubkeyList::new()).unwrap();

        assert!(store.key_exists("P").unwrap());
        assert!(store.fetch_subkeys("P").unwrap().is_empty());
        assert!(!store.key_exists(r"P\C").unwrap());
    }

    #[test]
    fn values_round_trip_and_skip_identical() {
        let store = store();
        let mut values = ValueList::new();
        values.set("Foo", &ValueData::String("bar".into()));
        store.store_values(r"HKLM\SOFTWARE\X", &values).unwrap();
        let seq = store.current_seqnum();

        let fetched = store.fetch_values(r"HKLM\SOFTWARE\X").unwrap();
        assert_eq!(fetched.values(), values.values());
        assert_eq!(fetched.values()[0].value_type, ValueType::String);

        store.store_values(r"HKLM\SOFTWARE\X", &fetched).unwrap();
        assert_eq!(store.current_seqnum(), seq);
    }

    #[test]
    fn security_descriptor_lifecycle() {
        let store = store();
        let path = r"HKLM\SOFTWARE\X";
        assert!(store.get_security_descriptor(path).unwrap_err().is_not_found());

        let sd = SecurityDescriptor::new().with_owner(Sid::builtin_administrators());
        store.set_security_descriptor(path, Some(&sd)).unwrap();
        assert_eq!(store.get_security_descriptor(path).unwrap(), sd);

        store.set_security_descriptor(path, None).unwrap();
        assert!(store.get_security_descriptor(path).unwrap_err().is_not_found());

        let seq = store.current_seqnum();
        store.set_security_descriptor(path, None).unwrap();
        assert_eq!(store.current_seqnum(), seq);
    }

    #[test]
    fn undecodable_descriptor_is_corrupt() {
        let store = store();
        store
            .engine()
            .store(&secdesc_record_key("K").unwrap(), b"garbage")
            .unwrap();
        assert!(matches!(
            store.get_security_descriptor("K"),
            Err(RegistryError::Corrupt { .. })
        ));
    }

    #[test]
    fn staleness_follows_seqnum() {
        let store = store();
        let list = store.fetch_subkeys("A").unwrap();
        let captured = store.current_seqnum();
        assert!(!store.subkeys_stale(&list));
        assert!(!store.is_stale(captured));

        store.store_subkeys("A", &SubkeyList::from_names(["B"])).unwrap();
        assert!(store.subkeys_stale(&list));
        assert!(store.is_stale(captured));

        let values = store.fetch_values("A").unwrap();
        assert!(!store.values_stale(&values));
        assert!(store.values_stale(&ValueList::new()));
    }

    #[test]
    fn version_mismatch_is_kept() {
        let engine = StorageEngine::open_in_memory(Config::new().engine_options());
        engine.store(REGDB_VERSION_KEY, &7u32.to_le_bytes()).unwrap();

        let store = RegistryStore::with_engine(engine, Config::new().seed_builtins(false)).unwrap();
        assert_eq!(store.format_version().unwrap(), Some(7));
    }
}
