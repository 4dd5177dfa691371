//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;
use regdb_codec::{RegistryValue, ValueType};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random key or value name of the specified length.
pub fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate `count` distinct subkey names.
pub fn generate_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}{i}", random_name(8))).collect()
}

/// Generate `count` binary values with `payload_size` bytes each.
pub fn generate_values(count: usize, payload_size: usize) -> Vec<RegistryValue> {
    (0..count)
        .map(|i| {
            RegistryValue::new(
                format!("Value{i}"),
                ValueType::Binary,
                random_data(payload_size),
            )
        })
        .collect()
}
