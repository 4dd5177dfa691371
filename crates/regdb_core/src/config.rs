//! Registry configuration.

use crate::engine::EngineOptions;
use crate::registry::REGVER_V1;
use std::time::Duration;

/// Configuration for opening a registry database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// How long a locked read waits for another process's transaction.
    pub read_lock_timeout: Duration,

    /// Whether to sync the file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to create the builtin keys and values on open.
    pub seed_builtins: bool,

    /// Format version written to new databases.
    pub format_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_lock_timeout: Duration::from_secs(10),
            sync_on_commit: true,
            seed_builtins: true,
            format_version: REGVER_V1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the locked-read timeout.
    #[must_use]
    pub const fn read_lock_timeout(mut self, timeout: Duration) -> Self {
        self.read_lock_timeout = timeout;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to seed builtin keys on open.
    #[must_use]
    pub const fn seed_builtins(mut self, value: bool) -> Self {
        self.seed_builtins = value;
        self
    }

    /// Sets the format version written to new databases.
    #[must_use]
    pub const fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    /// Returns the subset of settings the storage engine uses.
    #[must_use]
    pub const fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            create_if_missing: self.create_if_missing,
            sync_on_commit: self.sync_on_commit,
            read_lock_timeout: self.read_lock_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert!(config.seed_builtins);
        assert_eq!(config.read_lock_timeout, Duration::from_secs(10));
        assert_eq!(config.format_version, 1);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .read_lock_timeout(Duration::from_millis(50));

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);

        let options = config.engine_options();
        assert!(!options.create_if_missing);
        assert_eq!(options.read_lock_timeout, Duration::from_millis(50));
    }
}
