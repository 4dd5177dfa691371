//! # regdb testkit
//!
//! Test utilities for regdb.
//!
//! This crate provides:
//! - Temporary registries on disk and in memory
//! - Property-based test generators using proptest
//! - A storage backend that simulates a writer crashing mid-commit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use regdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_registry() {
//!     with_temp_registry(|store| {
//!         scenarios::populate_tree(store, "HKCR", 2, 3).unwrap();
//!         assert_eq!(store.fetch_subkeys("HKCR").unwrap().len(), 3);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
