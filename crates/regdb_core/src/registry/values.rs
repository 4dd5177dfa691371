//! Typed registry values and value lists.

use crate::error::{RegistryError, RegistryResult};
use crate::types::SequenceNumber;
use regdb_codec::{RegistryValue, ValueType};

/// The decoded contents of a registry value.
///
/// Strings are stored as NUL-terminated UTF-16LE, DWORDs as little-endian
/// 32-bit integers and multi-strings as a run of NUL-terminated strings
/// closed by an extra NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueData {
    /// `REG_NONE`.
    None,
    /// `REG_SZ`.
    String(String),
    /// `REG_EXPAND_SZ`.
    ExpandString(String),
    /// `REG_DWORD`.
    Dword(u32),
    /// `REG_MULTI_SZ`.
    MultiString(Vec<String>),
    /// `REG_BINARY`.
    Binary(Vec<u8>),
}

impl ValueData {
    /// Returns the type tag.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::None => ValueType::None,
            Self::String(_) => ValueType::String,
            Self::ExpandString(_) => ValueType::ExpandString,
            Self::Dword(_) => ValueType::Dword,
            Self::MultiString(_) => ValueType::MultiString,
            Self::Binary(_) => ValueType::Binary,
        }
    }

    /// Encodes the value into its stored bytes.
    ///
    /// Empty multi-string items are left out: an empty item would read
    /// back as the list terminator and hide every item after it.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::String(s) | Self::ExpandString(s) => encode_utf16z(s),
            Self::Dword(v) => v.to_le_bytes().to_vec(),
            Self::MultiString(items) => {
                let mut out = Vec::new();
                for item in items.iter().filter(|item| !item.is_empty()) {
                    out.extend(encode_utf16z(item));
                }
                out.extend_from_slice(&[0, 0]);
                out
            }
            Self::Binary(bytes) => bytes.clone(),
        }
    }

    /// Decodes stored bytes of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Corrupt`] if a DWORD is not four bytes or a
    /// string is not valid UTF-16.
    pub fn from_bytes(value_type: ValueType, data: &[u8]) -> RegistryResult<Self> {
        Ok(match value_type {
            ValueType::None => Self::None,
            ValueType::String => Self::String(decode_utf16z(data)?),
            ValueType::ExpandString => Self::ExpandString(decode_utf16z(data)?),
            ValueType::Dword => {
                let bytes: [u8; 4] = data.try_into().map_err(|_| {
                    RegistryError::corrupt(format!("DWORD value of {} bytes", data.len()))
                })?;
                Self::Dword(u32::from_le_bytes(bytes))
            }
            ValueType::MultiString => Self::MultiString(decode_multi_sz(data)?),
            ValueType::Binary => Self::Binary(data.to_vec()),
        })
    }

    /// Decodes a stored value.
    ///
    /// # Errors
    ///
    /// See [`ValueData::from_bytes`].
    pub fn from_value(value: &RegistryValue) -> RegistryResult<Self> {
        Self::from_bytes(value.value_type, &value.data)
    }
}

fn encode_utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn utf16_units(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn decode_units(units: &[u16]) -> RegistryResult<String> {
    String::from_utf16(units).map_err(|_| RegistryError::corrupt("string value is not valid UTF-16"))
}

fn decode_utf16z(data: &[u8]) -> RegistryResult<String> {
    let units = utf16_units(data);
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    decode_units(&units[..end])
}

fn decode_multi_sz(data: &[u8]) -> RegistryResult<Vec<String>> {
    let units = utf16_units(data);
    let mut items = Vec::new();
    for chunk in units.split(|&u| u == 0) {
        if chunk.is_empty() {
            break;
        }
        items.push(decode_units(chunk)?);
    }
    Ok(items)
}

/// The values of a key, with the sequence number at which they were read.
///
/// Names are matched ignoring case; the empty name is the key's default
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueList {
    values: Vec<RegistryValue>,
    seqnum: SequenceNumber,
}

impl ValueList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list from raw values, keeping their order.
    #[must_use]
    pub fn from_values(values: Vec<RegistryValue>) -> Self {
        Self {
            values,
            seqnum: SequenceNumber::default(),
        }
    }

    pub(crate) fn with_seqnum(values: Vec<RegistryValue>, seqnum: SequenceNumber) -> Self {
        Self { values, seqnum }
    }

    /// Returns the raw values in order.
    #[must_use]
    pub fn values(&self) -> &[RegistryValue] {
        &self.values
    }

    /// Returns the sequence number the list was read at, 0 if it was built
    /// locally or the read timed out.
    #[must_use]
    pub const fn seqnum(&self) -> SequenceNumber {
        self.seqnum
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&RegistryValue> {
        self.values.get(index)
    }

    /// Returns the value with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegistryValue> {
        self.position(name).map(|i| &self.values[i])
    }

    /// Returns true if a value with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns an iterator over the raw values.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryValue> {
        self.values.iter()
    }

    /// Sets a value, replacing any value of the same name.
    pub fn set(&mut self, name: &str, data: &ValueData) {
        let value = RegistryValue::new(name, data.value_type(), data.to_bytes());
        self.set_raw(value);
    }

    /// Sets a raw value, replacing any value of the same name.
    pub fn set_raw(&mut self, value: RegistryValue) {
        self.remove(&value.name);
        self.values.push(value);
    }

    /// Removes a value.
    ///
    /// Returns true if the value was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.values.remove(index);
                true
            }
            None => false,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        let wanted = name.to_uppercase();
        self.values
            .iter()
            .position(|v| v.name.to_uppercase() == wanted)
    }
}
