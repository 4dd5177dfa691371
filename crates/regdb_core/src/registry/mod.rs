//! The registry layer.
//!
//! A registry is a tree of keys. Each key has three records in the
//! database, all addressed by its normalized path:
//!
//! - the ordered list of its subkey names,
//! - its values, stored under [`REG_VALUE_PREFIX`],
//! - optionally a security descriptor, stored under [`REG_SECDESC_PREFIX`].
//!
//! [`RegistryStore`] reads and writes these records. [`RegistryContext`]
//! shares one store between callers with open/close reference counting,
//! [`BackendTable`] routes subtrees to other [`RegistryBackend`]s and
//! [`RegistryKey`] offers a key-at-a-time view.

mod backend;
mod builtin;
mod handle;
mod key;
mod path;
mod store;
mod subkeys;
mod values;

pub use backend::{BackendTable, RegistryBackend};
pub use builtin::{BuiltinData, BuiltinValue, BUILTIN_KEYS, BUILTIN_VALUES};
pub use handle::{RegistryContext, RegistryHandle};
pub use key::{CreateAction, RegistryKey};
pub use path::{
    normalize, secdesc_record_key, subkey_record_key, validate_name, value_record_key, KeyPath,
    KEY_SEPARATOR, REGDB_VERSION_KEY, REG_SECDESC_PREFIX, REG_VALUE_PREFIX, STORAGE_SEPARATOR,
};
pub use store::{RegistryStore, REGVER_V1};
pub use subkeys::SubkeyList;
pub use values::{ValueData, ValueList};
