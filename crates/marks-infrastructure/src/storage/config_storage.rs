//! Configuration file storage.
//!
//! Loads `config.toml` and layers environment overrides on top.

use crate::paths::MarksPaths;
use marks_core::config::AppConfig;
use marks_core::error::{MarksError, Result};
use std::fs;
use std::path::PathBuf;

/// Environment variables that override `[remote]` fields.
pub const ENV_API_URL: &str = "MARKS_API_URL";
pub const ENV_ANON_KEY: &str = "MARKS_ANON_KEY";
pub const ENV_TABLE: &str = "MARKS_TABLE";

/// Storage for the configuration file (config.toml).
///
/// Responsibilities:
/// - Load config.toml from the marks config directory
/// - Apply `MARKS_*` environment overrides
/// - Validate the result
///
/// A missing file is not an error as long as the environment supplies the
/// required fields.
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Creates a ConfigStorage for `config.toml` under the given paths.
    pub fn new(paths: &MarksPaths) -> Result<Self> {
        Ok(Self {
            path: paths.config_file()?,
        })
    }

    /// Creates a ConfigStorage with a custom path (for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the configuration, applying overrides from the process
    /// environment.
    pub fn load(&self) -> Result<AppConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Loads the configuration, applying overrides from `lookup`.
    ///
    /// # Returns
    ///
    /// - `Ok(AppConfig)`: Loaded, overridden and validated
    /// - `Err(MarksError::Io)`: The file exists but could not be read
    /// - `Err(MarksError::Serialization)`: Invalid TOML
    /// - `Err(MarksError::Config)`: Required settings missing
    pub fn load_with_env<F>(&self, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if self.path.exists() {
            let content = fs::read_to_string(&self.path)?;
            toml::from_str::<AppConfig>(&content)?
        } else {
            tracing::debug!(
                "[ConfigStorage] No config file at {}, using defaults",
                self.path.display()
            );
            AppConfig::default()
        };

        if let Some(api_url) = lookup(ENV_API_URL) {
            config.remote.api_url = api_url;
        }
        if let Some(anon_key) = lookup(ENV_ANON_KEY) {
            config.remote.anon_key = anon_key;
        }
        if let Some(table) = lookup(ENV_TABLE) {
            config.remote.table = table;
        }

        config.validate().map_err(|e| match e {
            MarksError::Config(message) => MarksError::config(format!(
                "{} (file: {}, or set {} / {})",
                message,
                self.path.display(),
                ENV_API_URL,
                ENV_ANON_KEY
            )),
            other => other,
        })?;

        Ok(config)
    }

    /// Returns the path to the config file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
