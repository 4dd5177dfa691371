//! # regdb core
//!
//! Transactional registry database.
//!
//! This crate provides:
//! - [`StorageEngine`]: an append-only, crash-safe key/value log shared by
//!   several processes through a file lock, with nestable transactions
//! - [`RegistryStore`]: registry keys, values and security descriptors on
//!   top of the engine, with change detection through sequence numbers
//! - [`RegistryContext`]: reference-counted open/close of a database
//! - [`SmbConf`]: an smb.conf-style configuration API over the registry
//!
//! ## Usage
//!
//! ```
//! use regdb_core::{Config, RegistryKey, RegistryStore, ValueData};
//!
//! let store = RegistryStore::open_in_memory(Config::default()).unwrap();
//! let key = RegistryKey::open(&store, r"HKLM\SOFTWARE\Samba").unwrap();
//! let (conf, _) = key.create_subkey("Example").unwrap();
//! conf.set_value("Enabled", &ValueData::Dword(1)).unwrap();
//!
//! assert_eq!(conf.query_value("enabled").unwrap(), ValueData::Dword(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conf;
mod config;
pub mod engine;
mod error;
pub mod registry;
mod types;

pub use conf::{format_value, ShareConfig, SmbConf, GLOBAL_NAME, SMBCONF_BASE_KEY};
pub use config::Config;
pub use engine::{EngineOptions, ReadOutcome, StorageEngine};
pub use error::{RegistryError, RegistryResult};
pub use registry::{
    BackendTable, CreateAction, KeyPath, RegistryBackend, RegistryContext, RegistryHandle,
    RegistryKey, RegistryStore, SubkeyList, ValueData, ValueList, REGVER_V1,
};
pub use types::SequenceNumber;

pub use regdb_codec::{RegistryValue, SecurityDescriptor, ValueType};
