//! Registry value tuples as stored on disk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type tag of a registry value.
///
/// The numeric tags match the registry wire values and are stored verbatim
/// in value records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ValueType {
    /// No type (`REG_NONE`).
    None = 0,
    /// NUL-terminated UTF-16LE string (`REG_SZ`).
    String = 1,
    /// String with unexpanded environment references (`REG_EXPAND_SZ`).
    ExpandString = 2,
    /// Arbitrary bytes (`REG_BINARY`).
    Binary = 3,
    /// Little-endian 32-bit integer (`REG_DWORD`).
    Dword = 4,
    /// Sequence of strings (`REG_MULTI_SZ`).
    MultiString = 7,
}

impl ValueType {
    /// Converts a stored tag into a type, `None` for unknown tags.
    #[must_use]
    pub const fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::String),
            2 => Some(Self::ExpandString),
            3 => Some(Self::Binary),
            4 => Some(Self::Dword),
            7 => Some(Self::MultiString),
            _ => None,
        }
    }

    /// Returns the stored tag.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the conventional registry name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "REG_NONE",
            Self::String => "REG_SZ",
            Self::ExpandString => "REG_EXPAND_SZ",
            Self::Binary => "REG_BINARY",
            Self::Dword => "REG_DWORD",
            Self::MultiString => "REG_MULTI_SZ",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed value with its raw bytes.
///
/// The codec never interprets `data`; typed access is layered on top by
/// the registry store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryValue {
    /// Value name. The empty name is the key's default value.
    pub name: String,
    /// Type tag.
    pub value_type: ValueType,
    /// Raw value bytes.
    pub data: Vec<u8>,
}

impl RegistryValue {
    /// Creates a value.
    pub fn new(name: impl Into<String>, value_type: ValueType, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value_type,
            data,
        }
    }

    /// Returns the size of the raw data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_registry_numbering() {
        for t in [
            ValueType::None,
            ValueType::String,
            ValueType::ExpandString,
            ValueType::Binary,
            ValueType::Dword,
            ValueType::MultiString,
        ] {
            assert_eq!(ValueType::from_u32(t.as_u32()), Some(t));
        }
        assert_eq!(ValueType::MultiString.as_u32(), 7);
        assert_eq!(ValueType::from_u32(5), None);
        assert_eq!(ValueType::from_u32(11), None);
    }

    #[test]
    fn display_uses_registry_names() {
        assert_eq!(ValueType::Dword.to_string(), "REG_DWORD");
        assert_eq!(ValueType::String.to_string(), "REG_SZ");
    }
}
