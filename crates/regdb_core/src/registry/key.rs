//! Key-level registry API.

use super::backend::RegistryBackend;
use super::path::{validate_name, KeyPath};
use super::subkeys::SubkeyList;
use super::values::{ValueData, ValueList};
use crate::error::{RegistryError, RegistryResult};
use tracing::trace;

/// Whether [`RegistryKey::create_subkey`] made a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateAction {
    /// The subkey did not exist and was created.
    CreatedNew,
    /// The subkey already existed.
    OpenedExisting,
}

/// An open registry key.
#[derive(Clone)]
pub struct RegistryKey<'a> {
    backend: &'a dyn RegistryBackend,
    path: KeyPath,
}

impl std::fmt::Debug for RegistryKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryKey")
            .field("path", &self.path.to_string())
            .finish_non_exhaustive()
    }
}

impl<'a> RegistryKey<'a> {
    /// Opens an existing key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an empty path and
    /// [`RegistryError::NotFound`] if the key does not exist.
    pub fn open(backend: &'a dyn RegistryBackend, path: &str) -> RegistryResult<Self> {
        let path = KeyPath::parse(path)?;
        if !backend.key_exists(&path.to_string())? {
            return Err(RegistryError::not_found(format!("key {path}")));
        }
        Ok(Self { backend, path })
    }

    /// Returns the key's path.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Returns the key's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.leaf()
    }

    fn path_string(&self) -> String {
        self.path.to_string()
    }

    /// Returns the subkeys.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn subkeys(&self) -> RegistryResult<SubkeyList> {
        self.backend.fetch_subkeys(&self.path_string())
    }

    /// Returns the name of the subkey at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] past the last subkey.
    pub fn enum_subkey(&self, index: usize) -> RegistryResult<String> {
        self.subkeys()?
            .get(index)
            .map(str::to_string)
            .ok_or_else(|| RegistryError::not_found(format!("subkey {index} of {}", self.path)))
    }

    /// Returns the values.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn values(&self) -> RegistryResult<ValueList> {
        self.backend.fetch_values(&self.path_string())
    }

    /// Returns the name and data of the value at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] past the last value and
    /// [`RegistryError::Corrupt`] if the data cannot be decoded.
    pub fn enum_value(&self, index: usize) -> RegistryResult<(String, ValueData)> {
        let values = self.values()?;
        let value = values
            .get_index(index)
            .ok_or_else(|| RegistryError::not_found(format!("value {index} of {}", self.path)))?;
        Ok((value.name.clone(), ValueData::from_value(value)?))
    }

    /// Returns the data of a named value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if there is no such value and
    /// [`RegistryError::Corrupt`] if the data cannot be decoded.
    pub fn query_value(&self, name: &str) -> RegistryResult<ValueData> {
        let values = self.values()?;
        let value = values
            .get(name)
            .ok_or_else(|| RegistryError::not_found(format!("value {name} of {}", self.path)))?;
        ValueData::from_value(value)
    }

    /// Creates or replaces a value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an invalid name or a
    /// backend error.
    pub fn set_value(&self, name: &str, data: &ValueData) -> RegistryResult<()> {
        validate_name(name)?;
        let mut values = self.values()?;
        values.set(name, data);
        self.backend.store_values(&self.path_string(), &values)
    }

    /// Deletes a value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if there is no such value.
    pub fn delete_value(&self, name: &str) -> RegistryResult<()> {
        let mut values = self.values()?;
        if !values.remove(name) {
            return Err(RegistryError::not_found(format!(
                "value {name} of {}",
                self.path
            )));
        }
        self.backend.store_values(&self.path_string(), &values)
    }

    /// Creates a subkey, or opens it if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an invalid name or a
    /// backend error.
    pub fn create_subkey(&self, name: &str) -> RegistryResult<(RegistryKey<'a>, CreateAction)> {
        let child = self.path.join(name)?;
        let mut subkeys = self.subkeys()?;

        let action = if subkeys.add_key(name) {
            trace!(key = %child, "creating subkey");
            self.backend.store_subkeys(&self.path_string(), &subkeys)?;
            CreateAction::CreatedNew
        } else {
            CreateAction::OpenedExisting
        };

        Ok((
            RegistryKey {
                backend: self.backend,
                path: child,
            },
            action,
        ))
    }

    /// Deletes a subkey together with everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] for an invalid name and
    /// [`RegistryError::NotFound`] if there is no such subkey.
    pub fn delete_subkey_recursive(&self, name: &str) -> RegistryResult<()> {
        validate_name(name)?;
        let mut subkeys = self.subkeys()?;
        if !subkeys.remove_key(name) {
            return Err(RegistryError::not_found(format!(
                "subkey {name} of {}",
                self.path
            )));
        }
        self.backend.store_subkeys(&self.path_string(), &subkeys)
    }
}
