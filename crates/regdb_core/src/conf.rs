//! smb.conf-style configuration stored in the registry.
//!
//! Each share is a subkey of [`SMBCONF_BASE_KEY`] and each parameter a
//! `REG_SZ` value of that subkey. The `[global]` section is the share named
//! [`GLOBAL_NAME`].

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{
    KeyPath, RegistryContext, RegistryHandle, RegistryKey, SubkeyList, ValueData,
};
use crate::types::SequenceNumber;
use tracing::debug;

/// Registry key holding the configuration.
pub const SMBCONF_BASE_KEY: &str = r"HKLM\SOFTWARE\Samba\smbconf";

/// Name of the global section.
pub const GLOBAL_NAME: &str = "global";

/// One section of the configuration with its formatted parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
    /// Section name.
    pub name: String,
    /// `(parameter, value)` pairs in stored order.
    pub params: Vec<(String, String)>,
}

/// Configuration front-end over a registry handle.
#[derive(Debug)]
pub struct SmbConf {
    handle: RegistryHandle,
}

impl SmbConf {
    /// Opens the configuration, creating the base key if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be opened or the base key
    /// cannot be created.
    pub fn open(ctx: &RegistryContext) -> RegistryResult<Self> {
        let conf = Self {
            handle: ctx.open()?,
        };
        conf.ensure_base_key()?;
        Ok(conf)
    }

    /// Releases the registry reference.
    pub fn close(self) {
        drop(self);
    }

    /// Returns the registry sequence number, which changes with every
    /// configuration change.
    #[must_use]
    pub fn seqnum(&self) -> SequenceNumber {
        self.handle.current_seqnum()
    }

    fn ensure_base_key(&self) -> RegistryResult<()> {
        let base = KeyPath::parse(SMBCONF_BASE_KEY)?;
        if self.handle.key_exists(SMBCONF_BASE_KEY)? {
            return Ok(());
        }

        for key in base.ancestors_and_self() {
            let path = key.to_string();
            if self.handle.key_exists(&path)? {
                continue;
            }
            match key.parent() {
                Some(parent) => {
                    RegistryKey::open(&*self.handle, &parent.to_string())?
                        .create_subkey(key.leaf())?;
                }
                None => self.handle.store_subkeys(&path, &SubkeyList::new())?,
            }
        }
        debug!(key = SMBCONF_BASE_KEY, "configuration key created");
        Ok(())
    }

    fn base_key(&self) -> RegistryResult<RegistryKey<'_>> {
        RegistryKey::open(&*self.handle, SMBCONF_BASE_KEY)
    }

    fn share_key(&self, name: &str) -> RegistryResult<RegistryKey<'_>> {
        if !self.share_exists(name)? {
            return Err(RegistryError::no_such_service(name));
        }
        let path = KeyPath::parse(SMBCONF_BASE_KEY)?.join(name)?;
        RegistryKey::open(&*self.handle, &path.to_string())
    }

    /// Deletes the whole configuration, leaving an empty base key.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn drop_config(&self) -> RegistryResult<()> {
        let base = KeyPath::parse(SMBCONF_BASE_KEY)?;
        let parent_path = base
            .parent()
            .ok_or_else(|| RegistryError::invalid_param("configuration key has no parent"))?;
        let parent = RegistryKey::open(&*self.handle, &parent_path.to_string())?;

        self.handle.engine().transaction(|| {
            parent.delete_subkey_recursive(base.leaf())?;
            parent.create_subkey(base.leaf())?;
            Ok(())
        })?;
        debug!("configuration dropped");
        Ok(())
    }

    /// Returns the section names, `global` first.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn share_names(&self) -> RegistryResult<Vec<String>> {
        let subkeys = self.base_key()?.subkeys()?;

        let mut names = Vec::with_capacity(subkeys.len());
        if subkeys.contains(GLOBAL_NAME) {
            names.push(GLOBAL_NAME.to_string());
        }
        names.extend(
            subkeys
                .iter()
                .filter(|name| !name.eq_ignore_ascii_case(GLOBAL_NAME))
                .map(str::to_string),
        );
        Ok(names)
    }

    /// Returns true if the section exists.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn share_exists(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.base_key()?.subkeys()?.contains(name))
    }

    /// Creates an empty section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] if the section exists and
    /// [`RegistryError::InvalidParam`] for an invalid name.
    pub fn create_share(&self, name: &str) -> RegistryResult<()> {
        if self.share_exists(name)? {
            return Err(RegistryError::already_exists(format!("share {name}")));
        }
        self.base_key()?.create_subkey(name)?;
        Ok(())
    }

    /// Returns the formatted parameters of a section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoSuchService`] if the section does not exist.
    pub fn get_share(&self, name: &str) -> RegistryResult<Vec<(String, String)>> {
        let key = self.share_key(name)?;
        let values = key.values()?;

        values
            .iter()
            .map(|value| Ok((value.name.clone(), format_value(&ValueData::from_value(value)?))))
            .collect()
    }

    /// Deletes a section and all its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoSuchService`] if the section does not exist.
    pub fn delete_share(&self, name: &str) -> RegistryResult<()> {
        if !self.share_exists(name)? {
            return Err(RegistryError::no_such_service(name));
        }
        self.base_key()?.delete_subkey_recursive(name)
    }

    /// Returns every section with its parameters, `global` first.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn get_config(&self) -> RegistryResult<Vec<ShareConfig>> {
        self.share_names()?
            .into_iter()
            .map(|name| {
                let params = self.get_share(&name)?;
                Ok(ShareConfig { name, params })
            })
            .collect()
    }

    /// Sets a parameter of a section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoSuchService`] if the section does not exist.
    pub fn set_parameter(&self, share: &str, param: &str, value: &str) -> RegistryResult<()> {
        self.share_key(share)?
            .set_value(param, &ValueData::String(value.to_string()))
    }

    /// Returns a parameter of a section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoSuchService`] if the section does not
    /// exist and [`RegistryError::InvalidParam`] if the parameter is unset.
    pub fn get_parameter(&self, share: &str, param: &str) -> RegistryResult<String> {
        match self.share_key(share)?.query_value(param) {
            Ok(data) => Ok(format_value(&data)),
            Err(e) if e.is_not_found() => Err(RegistryError::invalid_param(format!(
                "parameter {param} is not set in {share}"
            ))),
            Err(e) => Err(e),
        }
    }

    /// Deletes a parameter of a section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoSuchService`] if the section does not
    /// exist and [`RegistryError::InvalidParam`] if the parameter is unset.
    pub fn delete_parameter(&self, share: &str, param: &str) -> RegistryResult<()> {
        match self.share_key(share)?.delete_value(param) {
            Err(e) if e.is_not_found() => Err(RegistryError::invalid_param(format!(
                "parameter {param} is not set in {share}"
            ))),
            other => other,
        }
    }

    fn ensure_global(&self) -> RegistryResult<()> {
        if !self.share_exists(GLOBAL_NAME)? {
            self.create_share(GLOBAL_NAME)?;
        }
        Ok(())
    }

    /// Sets a global parameter, creating the global section if needed.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn set_global_parameter(&self, param: &str, value: &str) -> RegistryResult<()> {
        self.ensure_global()?;
        self.set_parameter(GLOBAL_NAME, param, value)
    }

    /// Returns a global parameter, creating the global section if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] if the parameter is unset.
    pub fn get_global_parameter(&self, param: &str) -> RegistryResult<String> {
        self.ensure_global()?;
        self.get_parameter(GLOBAL_NAME, param)
    }

    /// Deletes a global parameter, creating the global section if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParam`] if the parameter is unset.
    pub fn delete_global_parameter(&self, param: &str) -> RegistryResult<()> {
        self.ensure_global()?;
        self.delete_parameter(GLOBAL_NAME, param)
    }
}

/// Formats a value the way configuration listings show it.
#[must_use]
pub fn format_value(data: &ValueData) -> String {
    match data {
        ValueData::Dword(v) => v.to_string(),
        ValueData::String(s) | ValueData::ExpandString(s) => s.clone(),
        ValueData::MultiString(items) => items
            .iter()
            .map(|item| format!("\"{item}\""))
            .collect::<Vec<_>>()
            .join(" "),
        ValueData::Binary(bytes) => format!("binary ({} bytes)", bytes.len()),
        ValueData::None => "<unprintable>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::{tempdir, TempDir};

    fn open(config: Config) -> (TempDir, RegistryContext, SmbConf) {
        let dir = tempdir().unwrap();
        let ctx = RegistryContext::new(dir.path().join("registry.db"), config);
        let conf = SmbConf::open(&ctx).unwrap();
        (dir, ctx, conf)
    }

    #[test]
    fn format_values() {
        assert_eq!(format_value(&ValueData::Dword(42)), "42");
        assert_eq!(format_value(&ValueData::String("yes".into())), "yes");
        assert_eq!(
            format_value(&ValueData::MultiString(vec!["a".into(), "b c".into()])),
            r#""a" "b c""#
        );
        assert_eq!(format_value(&ValueData::Binary(vec![0; 3])), "binary (3 bytes)");
        assert_eq!(format_value(&ValueData::None), "<unprintable>");
    }

    #[test]
    fn base_key_created_without_builtins() {
        let (_dir, ctx, conf) = open(Config::default().seed_builtins(false));
        assert!(conf.share_names().unwrap().is_empty());
        assert!(ctx.open().unwrap().key_exists(SMBCONF_BASE_KEY).unwrap());
    }

    #[test]
    fn share_lifecycle() {
        let (_dir, _ctx, conf) = open(Config::default());

        conf.create_share("homes").unwrap();
        assert!(matches!(
            conf.create_share("HOMES"),
            Err(RegistryError::AlreadyExists { .. })
        ));
        conf.set_parameter("homes", "read only", "no").unwrap();
        assert_eq!(conf.get_parameter("homes", "read only").unwrap(), "no");
        assert_eq!(
            conf.get_share("homes").unwrap(),
            vec![("read only".to_string(), "no".to_string())]
        );

        conf.delete_share("homes").unwrap();
        assert!(!conf.share_exists("homes").unwrap());
        assert!(matches!(
            conf.delete_share("homes"),
            Err(RegistryError::NoSuchService { .. })
        ));
    }

    #[test]
    fn missing_share_or_parameter() {
        let (_dir, _ctx, conf) = open(Config::default());

        assert!(matches!(
            conf.set_parameter("nope", "path", "/tmp"),
            Err(RegistryError::NoSuchService { .. })
        ));
        assert!(matches!(
            conf.get_share("nope"),
            Err(RegistryError::NoSuchService { .. })
        ));

        conf.create_share("data").unwrap();
        assert!(matches!(
            conf.get_parameter("data", "path"),
            Err(RegistryError::InvalidParam { .. })
        ));
        assert!(matches!(
            conf.delete_parameter("data", "path"),
            Err(RegistryError::InvalidParam { .. })
        ));
    }

    #[test]
    fn global_section_listed_first_and_created_on_demand() {
        let (_dir, _ctx, conf) = open(Config::default());
        conf.create_share("printers").unwrap();
        assert!(matches!(
            conf.get_global_parameter("workgroup"),
            Err(RegistryError::InvalidParam { .. })
        ));
        conf.set_global_parameter("workgroup", "SAMBA").unwrap();

        assert_eq!(conf.share_names().unwrap(), ["global", "printers"]);
        assert_eq!(conf.get_global_parameter("WORKGROUP").unwrap(), "SAMBA");

        conf.delete_global_parameter("workgroup").unwrap();
        let config = conf.get_config().unwrap();
        assert_eq!(config[0], ShareConfig { name: "global".into(), params: vec![] });
    }

    #[test]
    fn drop_config_empties_everything() {
        let (_dir, _ctx, conf) = open(Config::default());
        conf.set_global_parameter("workgroup", "SAMBA").unwrap();
        conf.create_share("data").unwrap();
        let before = conf.seqnum();

        conf.drop_config().unwrap();

        assert!(conf.share_names().unwrap().is_empty());
        assert!(conf.get_config().unwrap().is_empty());
        assert!(conf.seqnum() > before);
    }

    #[test]
    fn close_releases_reference() {
        let (_dir, ctx, conf) = open(Config::default());
        assert_eq!(ctx.refcount(), 1);
        conf.close();
        assert_eq!(ctx.refcount(), 0);
    }
}
