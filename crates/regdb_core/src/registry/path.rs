//! Registry paths and storage keys.
//!
//! Callers name keys with backslash-separated paths such as
//! `HKLM\SOFTWARE\Samba`. Inside the database every path is normalized:
//! separators become `/` and the whole string is upper-cased, so paths that
//! differ only in case address the same records. Value records and security
//! descriptors live under their own prefixes so the three record kinds of a
//! key never collide.

use crate::error::{RegistryError, RegistryResult};
use std::fmt;
use std::str::FromStr;

/// Separator used in caller-facing paths.
pub const KEY_SEPARATOR: char = '\\';

/// Separator used in storage keys.
pub const STORAGE_SEPARATOR: char = '/';

/// Namespace prefix of value records.
pub const REG_VALUE_PREFIX: &str = "SAMBA_REGVAL";

/// Namespace prefix of security-descriptor records.
pub const REG_SECDESC_PREFIX: &str = "SAMBA_SECDESC";

/// Storage key holding the database format version.
pub const REGDB_VERSION_KEY: &str = "INFO/version";

/// Converts a path into its canonical storage form.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidParam`] for an empty path.
pub fn normalize(path: &str) -> RegistryResult<String> {
    if path.is_empty() {
        return Err(RegistryError::invalid_param("empty registry path"));
    }
    Ok(path
        .chars()
        .map(|c| if c == KEY_SEPARATOR { STORAGE_SEPARATOR } else { c })
        .collect::<String>()
        .to_uppercase())
}

/// Storage key of a key's subkey record.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidParam`] for an empty path.
pub fn subkey_record_key(path: &str) -> RegistryResult<String> {
    normalize(path)
}

/// Storage key of a key's value record.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidParam`] for an empty path.
pub fn value_record_key(path: &str) -> RegistryResult<String> {
    prefixed(REG_VALUE_PREFIX, path)
}

/// Storage key of a key's security descriptor.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidParam`] for an empty path.
pub fn secdesc_record_key(path: &str) -> RegistryResult<String> {
    prefixed(REG_SECDESC_PREFIX, path)
}

fn prefixed(prefix: &str, path: &str) -> RegistryResult<String> {
    let key = normalize(path)?;
    Ok(format!("{prefix}{STORAGE_SEPARATOR}{key}"))
}

/// Checks a single subkey or value name.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidParam`] if the name is empty or contains
/// the path separator.
pub fn validate_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::invalid_param("empty name"));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(RegistryError::invalid_param(format!(
            "name {name:?} contains a path separator"
        )));
    }
    Ok(())
}

/// A parsed registry path.
///
/// Empty components (doubled, leading or trailing separators) are dropped
/// and both separators are accepted. Case is preserved; compare
/// [`KeyPath::normalized`] forms to test for equality the way the database
/// does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    components: Vec<String>,
}

impl KeyPath {
    /// Parses a path.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] if the path has no components.
    pub fn parse(path: &str) -> RegistryResult<Self> {
        let components: Vec<String> = path
            .split([KEY_SEPARATOR, STORAGE_SEPARATOR])
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        if components.is_empty() {
            return Err(RegistryError::invalid_param(format!(
                "registry path {path:?} has no components"
            )));
        }
        Ok(Self { components })
    }

    /// Returns the components, root first.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Returns the number of components.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Returns the last component.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.components.last().map_or("", String::as_str)
    }

    /// Returns the parent path, `None` for a root key.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.components.len() > 1).then(|| Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Returns the path of a direct child.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] if `name` is not a valid
    /// single component.
    pub fn join(&self, name: &str) -> RegistryResult<Self> {
        validate_name(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Returns every path from the root key down to this one.
    #[must_use]
    pub fn ancestors_and_self(&self) -> Vec<Self> {
        (1..=self.components.len())
            .map(|n| Self {
                components: self.components[..n].to_vec(),
            })
            .collect()
    }

    /// Returns the canonical storage form.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.components
            .iter()
            .map(|c| c.to_uppercase())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "{KEY_SEPARATOR}")?;
            }
            f.write_str(component)?;
        }
        Ok(())
    }
}

impl FromStr for KeyPath {
    type Err = RegistryError;

    fn from_str(s: &str) -> RegistryResult<Self> {
        Self::parse(s)
    }
}
