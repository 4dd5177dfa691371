//! Keys and values every registry database starts with.

use super::path::KeyPath;
use super::store::RegistryStore;
use super::values::ValueData;
use crate::error::RegistryResult;
use tracing::{debug, trace};

/// Keys created on initialization, with all their ancestors.
pub const BUILTIN_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Print\Printers",
    r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Ports",
    r"HKLM\SYSTEM\CurrentControlSet\Control\Print\Environments",
    r"HKLM\SYSTEM\CurrentControlSet\Services\LanmanServer\Shares",
    r"HKLM\SYSTEM\CurrentControlSet\Services\Eventlog",
    r"HKLM\SOFTWARE\Samba\smbconf",
    r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Perflib",
    r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Perflib\009",
    r"HKLM\SYSTEM\CurrentControlSet\Control\Print\Monitors",
    r"HKLM\SYSTEM\CurrentControlSet\Control\ProductOptions",
    r"HKLM\SYSTEM\CurrentControlSet\Control\Terminal Server\DefaultUserConfiguration",
    r"HKLM\SYSTEM\CurrentControlSet\Services\TcpIp\Parameters",
    r"HKLM\SYSTEM\CurrentControlSet\Services\Netlogon\Parameters",
    "HKU",
    "HKCR",
    "HKPD",
    "HKPT",
];

/// Default contents of a builtin value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinData {
    /// `REG_SZ`.
    String(&'static str),
    /// `REG_DWORD`.
    Dword(u32),
}

impl BuiltinData {
    fn to_value_data(self) -> ValueData {
        match self {
            Self::String(s) => ValueData::String(s.to_string()),
            Self::Dword(v) => ValueData::Dword(v),
        }
    }
}

/// A value created on initialization unless one of the same name exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinValue {
    /// Key holding the value.
    pub path: &'static str,
    /// Value name.
    pub name: &'static str,
    /// Default contents.
    pub data: BuiltinData,
}

/// Values created on initialization.
pub const BUILTIN_VALUES: &[BuiltinValue] = &[
    BuiltinValue {
        path: r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Ports",
        name: "Samba Printer Port",
        data: BuiltinData::String(""),
    },
    BuiltinValue {
        path: r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Print\Printers",
        name: "DefaultSpoolDirectory",
        data: BuiltinData::String(r"C:\Windows\System32\Spool\Printers"),
    },
    BuiltinValue {
        path: r"HKLM\SYSTEM\CurrentControlSet\Services\Eventlog",
        name: "DisplayName",
        data: BuiltinData::String("Event Log"),
    },
    BuiltinValue {
        path: r"HKLM\SYSTEM\CurrentControlSet\Services\Eventlog",
        name: "ErrorControl",
        data: BuiltinData::Dword(1),
    },
];

impl RegistryStore {
    /// Creates the builtin keys and values that are missing.
    ///
    /// Runs as one transaction. Existing keys and values, including values
    /// an operator changed, are left untouched, so running it again changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the transaction; nothing is written
    /// in that case.
    pub fn init_registry_data(&self) -> RegistryResult<()> {
        self.engine().transaction(|| {
            for path in BUILTIN_KEYS {
                self.ensure_key_path(path)?;
            }

            for builtin in BUILTIN_VALUES {
                let mut values = self.fetch_values(builtin.path)?;
                if values.contains(builtin.name) {
                    continue;
                }
                trace!(key = builtin.path, name = builtin.name, "creating builtin value");
                values.set(builtin.name, &builtin.data.to_value_data());
                self.store_values(builtin.path, &values)?;
            }
            Ok(())
        })?;

        debug!(seqnum = self.current_seqnum().as_u64(), "builtin registry data in place");
        Ok(())
    }

    /// Creates `path` and every ancestor, registering each component in
    /// its parent's subkey list.
    fn ensure_key_path(&self, path: &str) -> RegistryResult<()> {
        let path = KeyPath::parse(path)?;
        let chain = path.ancestors_and_self();

        for (i, key) in chain.iter().enumerate() {
            let key_name = key.to_string();
            let mut subkeys = self.fetch_subkeys(&key_name)?;

            let added = match chain.get(i + 1) {
                Some(next) => subkeys.add_key(next.leaf()),
                None => false,
            };
            if added || !self.key_exists(&key_name)? {
                trace!(key = %key_name, "creating builtin key");
                self.store_subkeys(&key_name, &subkeys)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn seeded() -> RegistryStore {
        RegistryStore::open_in_memory(Config::new()).unwrap()
    }

    #[test]
    fn every_builtin_key_exists() {
        let store = seeded();
        for path in BUILTIN_KEYS {
            assert!(store.key_exists(path).unwrap(), "{path} missing");
        }
    }

    #[test]
    fn intermediate_keys_list_their_children() {
        let store = seeded();
        let hklm = store.fetch_subkeys("HKLM").unwrap();
        assert_eq!(hklm.names(), ["SOFTWARE", "SYSTEM"]);

        let samba = store.fetch_subkeys(r"HKLM\SOFTWARE\Samba").unwrap();
        assert_eq!(samba.names(), ["smbconf"]);

        let perflib = store
            .fetch_subkeys(r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Perflib")
            .unwrap();
        assert_eq!(perflib.names(), ["009"]);
    }

    #[test]
    fn builtin_values_present() {
        let store = seeded();
        let eventlog = store
            .fetch_values(r"HKLM\SYSTEM\CurrentControlSet\Services\Eventlog")
            .unwrap();
        assert_eq!(
            ValueData::from_value(eventlog.get("ErrorControl").unwrap()).unwrap(),
            ValueData::Dword(1)
        );
        assert_eq!(
            ValueData::from_value(eventlog.get("DisplayName").unwrap()).unwrap(),
            ValueData::String("Event Log".into())
        );
    }

    #[test]
    fn seeding_twice_changes_nothing() {
        let store = seeded();
        let seq = store.current_seqnum();
        store.init_registry_data().unwrap();
        assert_eq!(store.current_seqnum(), seq);
    }

    #[test]
    fn seeding_keeps_operator_values() {
        let store = seeded();
        let path = r"HKLM\SYSTEM\CurrentControlSet\Services\Eventlog";
        let mut values = store.fetch_values(path).unwrap();
        values.set("DisplayName", &ValueData::String("Custom".into()));
        store.store_values(path, &values).unwrap();

        store.init_registry_data().unwrap();

        let values = store.fetch_values(path).unwrap();
        assert_eq!(
            ValueData::from_value(values.get("DisplayName").unwrap()).unwrap(),
            ValueData::String("Custom".into())
        );
    }
}
