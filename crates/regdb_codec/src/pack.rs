//! Subkey and value record packing.
//!
//! ## Subkey record
//!
//! ```text
//! | count u32 | (len u32 | name bytes) * count |
//! ```
//!
//! ## Value record
//!
//! ```text
//! | count u32 | (len u32 | name bytes | type u32 | size u32 | data) * count |
//! ```
//!
//! Packing computes the exact record length first ([`packed_subkeys_len`],
//! [`packed_values_len`]) and allocates the output once, so callers that only
//! need the length never touch a buffer.

use crate::error::{CodecError, CodecResult};
use crate::value::{RegistryValue, ValueType};
use bytes::{Buf, BufMut};
use tracing::debug;

/// Maximum length in bytes of a subkey or value name.
pub const MAX_NAME_LEN: usize = 255;

/// Size of every length, count, type and size field.
const FIELD_SIZE: usize = 4;

fn field_u32(what: &'static str, value: usize) -> CodecResult<u32> {
    u32::try_from(value).map_err(|_| CodecError::FieldOverflow { what, value })
}

fn check_name(name: &str) -> CodecResult<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(CodecError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

fn allocate(len: usize) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CodecError::OutOfMemory { requested: len })?;
    Ok(buf)
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    // Lengths were validated by the matching `packed_*_len` call.
    buf.put_u32_le(name.len() as u32);
    buf.put_slice(name.as_bytes());
}

/// Returns the exact length of the subkey record for `names`.
///
/// # Errors
///
/// Returns an error if a name is longer than [`MAX_NAME_LEN`] or the list
/// does not fit the 32-bit count.
pub fn packed_subkeys_len<S: AsRef<str>>(names: &[S]) -> CodecResult<usize> {
    field_u32("subkey count", names.len())?;

    let mut len = FIELD_SIZE;
    for name in names {
        let name = name.as_ref();
        check_name(name)?;
        len += FIELD_SIZE + name.len();
    }
    Ok(len)
}

/// Packs an ordered list of subkey names.
///
/// # Errors
///
/// See [`packed_subkeys_len`]; additionally fails with
/// [`CodecError::OutOfMemory`] if the output cannot be allocated.
pub fn pack_subkeys<S: AsRef<str>>(names: &[S]) -> CodecResult<Vec<u8>> {
    let len = packed_subkeys_len(names)?;
    let mut buf = allocate(len)?;

    buf.put_u32_le(names.len() as u32);
    for name in names {
        put_name(&mut buf, name.as_ref());
    }

    debug_assert_eq!(buf.len(), len);
    Ok(buf)
}

/// Unpacks a subkey record.
///
/// Empty input is an empty list. A truncated name ends decoding, a name
/// that is not valid UTF-8 is skipped; in both cases the names read so far
/// are returned.
#[must_use]
pub fn unpack_subkeys(bytes: &[u8]) -> Vec<String> {
    let mut cur = bytes;
    if cur.remaining() < FIELD_SIZE {
        return Vec::new();
    }

    let count = cur.get_u32_le() as usize;
    let mut names = Vec::with_capacity(count.min(cur.remaining() / FIELD_SIZE));

    for index in 0..count {
        let Some(raw) = take_prefixed(&mut cur) else {
            debug!(index, count, "subkey record truncated");
            break;
        };
        match String::from_utf8(raw.to_vec()) {
            Ok(name) => names.push(name),
            Err(_) => debug!(index, "dropping subkey name with invalid UTF-8"),
        }
    }

    names
}

/// Returns the exact length of the value record for `values`.
///
/// # Errors
///
/// Returns an error if a name is longer than [`MAX_NAME_LEN`] or a count
/// or data size does not fit its 32-bit field.
pub fn packed_values_len(values: &[RegistryValue]) -> CodecResult<usize> {
    field_u32("value count", values.len())?;

    let mut len = FIELD_SIZE;
    for value in values {
        check_name(&value.name)?;
        field_u32("value size", value.data.len())?;
        len += FIELD_SIZE + value.name.len() + 2 * FIELD_SIZE + value.data.len();
    }
    Ok(len)
}

/// Packs a list of values.
///
/// # Errors
///
/// See [`packed_values_len`]; additionally fails with
/// [`CodecError::OutOfMemory`] if the output cannot be allocated.
pub fn pack_values(values: &[RegistryValue]) -> CodecResult<Vec<u8>> {
    let len = packed_values_len(values)?;
    let mut buf = allocate(len)?;

    buf.put_u32_le(values.len() as u32);
    for value in values {
        put_name(&mut buf, &value.name);
        buf.put_u32_le(value.value_type.as_u32());
        buf.put_u32_le(value.data.len() as u32);
        buf.put_slice(&value.data);
    }

    debug_assert_eq!(buf.len(), len);
    Ok(buf)
}

/// Unpacks a value record.
///
/// Tuples with an unknown type tag or a name that is not valid UTF-8 are
/// skipped. A tuple whose name or data runs past the end of the record
/// ends decoding. Everything decoded before the problem is returned.
#[must_use]
pub fn unpack_values(bytes: &[u8]) -> Vec<RegistryValue> {
    let mut cur = bytes;
    if cur.remaining() < FIELD_SIZE {
        return Vec::new();
    }

    let count = cur.get_u32_le() as usize;
    let mut values = Vec::with_capacity(count.min(cur.remaining() / (3 * FIELD_SIZE)));

    for index in 0..count {
        let Some(raw_name) = take_prefixed(&mut cur) else {
            debug!(index, count, "value record truncated in name");
            break;
        };
        if cur.remaining() < 2 * FIELD_SIZE {
            debug!(index, count, "value record truncated in header");
            break;
        }
        let tag = cur.get_u32_le();
        let size = cur.get_u32_le() as usize;
        if cur.remaining() < size {
            debug!(index, size, remaining = cur.remaining(), "dropping value with missing data");
            break;
        }
        let data = cur[..size].to_vec();
        cur.advance(size);

        let Some(value_type) = ValueType::from_u32(tag) else {
            debug!(index, tag, "dropping value with unknown type");
            continue;
        };
        let Ok(name) = String::from_utf8(raw_name.to_vec()) else {
            debug!(index, "dropping value with invalid UTF-8 name");
            continue;
        };

        values.push(RegistryValue {
            name,
            value_type,
            data,
        });
    }

    values
}

fn take_prefixed<'a>(cur: &mut &'a [u8]) -> Option<&'a [u8]> {
    if cur.remaining() < FIELD_SIZE {
        return None;
    }
    let len = cur.get_u32_le() as usize;
    if cur.remaining() < len {
        return None;
    }
    let slice: &'a [u8] = *cur;
    let (head, tail) = slice.split_at(len);
    *cur = tail;
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sz(name: &str, data: &[u8]) -> RegistryValue {
        RegistryValue::new(name, ValueType::String, data.to_vec())
    }

    #[test]
    fn subkey_layout_is_count_then_prefixed_names() {
        let bytes = pack_subkeys(&["A", "bc"]).unwrap();
        assert_eq!(
            bytes,
            vec![2, 0, 0, 0, 1, 0, 0, 0, b'A', 2, 0, 0, 0, b'b', b'c']
        );
    }

    #[test]
    fn value_layout_matches_record_format() {
        let bytes = pack_values(&[RegistryValue::new("X", ValueType::Dword, vec![1, 0, 0, 0])])
            .unwrap();
        assert_eq!(
            bytes,
            vec![
                1, 0, 0, 0, // count
                1, 0, 0, 0, b'X', // name
                4, 0, 0, 0, // type
                4, 0, 0, 0, // size
                1, 0, 0, 0, // data
            ]
        );
    }

    #[test]
    fn dry_run_length_matches_packed_output() {
        let values = vec![sz("Foo", b"bar"), sz("", b""), sz("Long", &[7; 300])];
        assert_eq!(packed_values_len(&values).unwrap(), pack_values(&values).unwrap().len());

        let names = ["one", "two", "three"];
        assert_eq!(packed_subkeys_len(&names).unwrap(), pack_subkeys(&names).unwrap().len());
    }

    #[test]
    fn empty_lists() {
        let no_names: [&str; 0] = [];
        assert_eq!(pack_subkeys(&no_names).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(pack_values(&[]).unwrap(), vec![0, 0, 0, 0]);
        assert!(unpack_subkeys(&[]).is_empty());
        assert!(unpack_values(&[]).is_empty());
        assert!(unpack_values(&[0, 0]).is_empty());
    }

    #[test]
    fn name_limit_enforced() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            pack_subkeys(&[long.as_str()]),
            Err(CodecError::NameTooLong { len: 256, max: 255 })
        ));
        assert!(matches!(
            pack_values(&[sz(&long, b"")]),
            Err(CodecError::NameTooLong { .. })
        ));
        assert!(pack_subkeys(&["x".repeat(MAX_NAME_LEN)]).is_ok());
    }

    #[test]
    fn truncated_value_data_is_dropped() {
        let mut bytes = pack_values(&[sz("keep", b"ok"), sz("lost", b"0123456789")]).unwrap();
        bytes.truncate(bytes.len() - 3);

        assert_eq!(unpack_values(&bytes), vec![sz("keep", b"ok")]);
    }

    #[test]
    fn unknown_type_is_skipped_but_later_values_survive() {
        let mut bytes = pack_values(&[sz("a", b"1"), sz("b", b"2"), sz("c", b"3")]).unwrap();
        // Patch the type tag of the second tuple: count(4) + first tuple(4+1+4+4+1)
        // + second name(4+1).
        let tag_offset = 4 + 14 + 5;
        bytes[tag_offset..tag_offset + 4].copy_from_slice(&99u32.to_le_bytes());

        let values = unpack_values(&bytes);
        assert_eq!(values, vec![sz("a", b"1"), sz("c", b"3")]);
    }

    #[test]
    fn overstated_count_returns_what_is_present() {
        let mut bytes = pack_subkeys(&["one", "two"]).unwrap();
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());

        assert_eq!(unpack_subkeys(&bytes), vec!["one", "two"]);
    }

    #[test]
    fn invalid_utf8_subkey_is_skipped() {
        let bytes = vec![2, 0, 0, 0, 1, 0, 0, 0, 0xff, 1, 0, 0, 0, b'k'];
        assert_eq!(unpack_subkeys(&bytes), vec!["k"]);
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[ -~]{0,40}").expect("valid regex")
    }

    fn value_type_strategy() -> impl Strategy<Value = ValueType> {
        prop_oneof![
            Just(ValueType::None),
            Just(ValueType::String),
            Just(ValueType::ExpandString),
            Just(ValueType::Binary),
            Just(ValueType::Dword),
            Just(ValueType::MultiString),
        ]
    }

    proptest! {
        #[test]
        fn subkeys_survive_packing(names in prop::collection::vec(name_strategy(), 0..20)) {
            let bytes = pack_subkeys(&names).unwrap();
            prop_assert_eq!(unpack_subkeys(&bytes), names);
        }

        #[test]
        fn values_survive_packing(
            raw in prop::collection::vec(
                (name_strategy(), value_type_strategy(), prop::collection::vec(any::<u8>(), 0..64)),
                0..12,
            )
        ) {
            let values: Vec<RegistryValue> = raw
                .into_iter()
                .map(|(name, value_type, data)| RegistryValue::new(name, value_type, data))
                .collect();
            let bytes = pack_values(&values).unwrap();
            prop_assert_eq!(unpack_values(&bytes), values);
        }

        #[test]
        fn unpack_never_panics_on_garbage(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = unpack_subkeys(&bytes);
            let _ = unpack_values(&bytes);
        }
    }
}
