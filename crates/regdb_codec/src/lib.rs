//! # regdb codec
//!
//! Binary record formats for the regdb registry database.
//!
//! Three kinds of records are stored:
//!
//! - **Subkey records**: `count: u32`, then `count` length-prefixed names
//! - **Value records**: `count: u32`, then `count` tuples of
//!   (length-prefixed name, `type: u32`, `size: u32`, `size` raw bytes)
//! - **Security descriptors**: canonical CBOR of [`SecurityDescriptor`]
//!
//! All integers are little-endian. Strings are `u32` length-prefixed UTF-8
//! and limited to [`MAX_NAME_LEN`] bytes.
//!
//! Decoding is tolerant: a malformed entry is dropped and the entries that
//! could be read are returned, so a partially damaged record still yields
//! its good data.
//!
//! ## Usage
//!
//! ```
//! use regdb_codec::{pack_values, unpack_values, RegistryValue, ValueType};
//!
//! let values = vec![RegistryValue::new("Foo", ValueType::String, b"bar".to_vec())];
//! let bytes = pack_values(&values).unwrap();
//! assert_eq!(unpack_values(&bytes), values);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod pack;
mod secdesc;
mod value;

pub use error::{CodecError, CodecResult};
pub use pack::{
    pack_subkeys, pack_values, packed_subkeys_len, packed_values_len, unpack_subkeys,
    unpack_values, MAX_NAME_LEN,
};
pub use secdesc::{
    marshal_sec_desc, unmarshal_sec_desc, Ace, AceType, Acl, SecurityDescriptor, Sid,
    SECURITY_DESCRIPTOR_REVISION_1,
};
pub use value::{RegistryValue, ValueType};
