//! # regdb storage
//!
//! Storage backends and locking primitives for the regdb registry database.
//!
//! Backends are **opaque byte stores**: they append and read raw bytes and
//! know nothing about log records, keys or transactions. The record format
//! and all replay logic live in `regdb_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral registries
//! - [`FileBackend`] - For the persistent database file
//!
//! ## Locking
//!
//! [`FileLock`] provides the whole-file advisory lock that serializes
//! writers across processes and lets readers wait a bounded time for a
//! writer to finish. It is held on a `<database>.lock` sidecar file.
//!
//! ## Example
//!
//! ```rust
//! use regdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use lock::{lock_path_for, FileLock, SharedLockGuard};
pub use memory::InMemoryBackend;
