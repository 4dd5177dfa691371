//! Property-based test generators using proptest.
//!
//! Provides strategies for generating registry data that respects the
//! naming rules of the store.

use proptest::prelude::*;
use regdb_codec::{RegistryValue, ValueType};
use regdb_core::{SubkeyList, ValueData, ValueList};
use std::collections::HashSet;

/// Strategy for generating valid key or value names.
pub fn key_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9_ .$-]{1,24}").expect("Invalid regex")
}

/// Strategy for generating registry paths below one of the root hives.
pub fn registry_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["HKLM", "HKU", "HKCR", "HKPT"]),
        prop::collection::vec(key_name_strategy(), 0..5),
    )
        .prop_map(|(hive, components)| {
            let mut path = hive.to_string();
            for component in components {
                path.push('\\');
                path.push_str(&component);
            }
            path
        })
}

/// Strategy for generating typed value data.
pub fn value_data_strategy() -> impl Strategy<Value = ValueData> {
    prop_oneof![
        Just(ValueData::None),
        "[ -~]{0,40}".prop_map(ValueData::String),
        "[ -~]{0,40}".prop_map(ValueData::ExpandString),
        any::<u32>().prop_map(ValueData::Dword),
        prop::collection::vec("[ -~]{1,16}", 0..5).prop_map(ValueData::MultiString),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(ValueData::Binary),
    ]
}

/// Strategy for generating raw values, including types the store does
/// not interpret and zero-length data.
pub fn registry_value_strategy() -> impl Strategy<Value = RegistryValue> {
    (
        key_name_strategy(),
        prop::sample::select(vec![
            ValueType::None,
            ValueType::String,
            ValueType::ExpandString,
            ValueType::Binary,
            ValueType::Dword,
            ValueType::MultiString,
        ]),
        prop::collection::vec(any::<u8>(), 0..128),
    )
        .prop_map(|(name, value_type, data)| RegistryValue::new(name, value_type, data))
}

/// Strategy for generating value lists with case-insensitively unique
/// names.
pub fn value_list_strategy() -> impl Strategy<Value = ValueList> {
    prop::collection::vec(registry_value_strategy(), 0..8).prop_map(|values| {
        let mut seen = HashSet::new();
        ValueList::from_values(
            values
                .into_iter()
                .filter(|v| seen.insert(v.name.to_uppercase()))
                .collect(),
        )
    })
}

/// Strategy for generating subkey lists with case-insensitively unique
/// names.
pub fn subkey_list_strategy() -> impl Strategy<Value = SubkeyList> {
    prop::collection::vec(key_name_strategy(), 0..8).prop_map(|names| {
        let mut seen = HashSet::new();
        SubkeyList::from_names(
            names
                .into_iter()
                .filter(|name| seen.insert(name.to_uppercase())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_names_are_valid(name in key_name_strategy()) {
            prop_assert!(regdb_core::registry::validate_name(&name).is_ok());
        }

        #[test]
        fn test_paths_normalize(path in registry_path_strategy()) {
            prop_assert!(regdb_core::registry::normalize(&path).is_ok());
        }

        #[test]
        fn test_value_lists_have_unique_names(values in value_list_strategy()) {
            let names: HashSet<_> = values.iter().map(|v| v.name.to_uppercase()).collect();
            prop_assert_eq!(names.len(), values.len());
        }

        #[test]
        fn test_subkey_lists_have_unique_names(subkeys in subkey_list_strategy()) {
            let names: HashSet<_> = subkeys.iter().map(str::to_uppercase).collect();
            prop_assert_eq!(names.len(), subkeys.len());
        }
    }
}
