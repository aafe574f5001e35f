//! Restore configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const CHECKSUM_CONCURRENCY_VAR: &str = "UPDRAFT_CHECKSUM_CONCURRENCY";
pub const DOWNLOAD_CONCURRENCY_VAR: &str = "UPDRAFT_DOWNLOAD_CONCURRENCY";
pub const RESTORE_CONCURRENCY_VAR: &str = "UPDRAFT_RESTORE_CONCURRENCY";
pub const PROGRESS_INTERVAL_VAR: &str = "UPDRAFT_PROGRESS_INTERVAL_MS";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be at least 1")]
    ZeroLimit { name: &'static str },

    #[error("invalid value '{value}' for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("cannot determine home directory; set UPDRAFT_HOME")]
    NoHome,
}

/// Concurrency limits and progress pacing for a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    pub checksum_concurrency: usize,
    pub download_concurrency: usize,
    pub restore_concurrency: usize,
    /// Progress updates arriving closer together than this are coalesced.
    pub progress_interval: Duration,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            checksum_concurrency: 1,
            download_concurrency: 2,
            restore_concurrency: 1,
            progress_interval: Duration::from_millis(500),
        }
    }
}

impl RestoreOptions {
    /// Defaults overridden by `UPDRAFT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { var, value }),
            }
        }

        let defaults = Self::default();
        let options = Self {
            checksum_concurrency: parse(&lookup, CHECKSUM_CONCURRENCY_VAR)?
                .unwrap_or(defaults.checksum_concurrency),
            download_concurrency: parse(&lookup, DOWNLOAD_CONCURRENCY_VAR)?
                .unwrap_or(defaults.download_concurrency),
            restore_concurrency: parse(&lookup, RESTORE_CONCURRENCY_VAR)?
                .unwrap_or(defaults.restore_concurrency),
            progress_interval: parse(&lookup, PROGRESS_INTERVAL_VAR)?
                .map_or(defaults.progress_interval, Duration::from_millis),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("checksum_concurrency", self.checksum_concurrency),
            ("download_concurrency", self.download_concurrency),
            ("restore_concurrency", self.restore_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { name });
            }
        }
        Ok(())
    }

    /// Default package cache for `app_id`, under the updraft home directory.
    pub fn packages_dir_for(app_id: &str) -> Result<PathBuf, ConfigError> {
        crate::paths::packages_path(app_id).ok_or(ConfigError::NoHome)
    }
}
