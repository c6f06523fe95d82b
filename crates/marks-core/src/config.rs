//! Configuration model.
//!
//! Read from `config.toml`; see `marks_infrastructure::storage::ConfigStorage`
//! for loading and environment overrides.

use crate::error::{MarksError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TABLE: &str = "bookmarks";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Checks the fields that have no usable default.
    pub fn validate(&self) -> Result<()> {
        if self.remote.api_url.trim().is_empty() {
            return Err(MarksError::config("remote.api_url is not set"));
        }
        if self.remote.anon_key.trim().is_empty() {
            return Err(MarksError::config("remote.anon_key is not set"));
        }
        if self.feed.reconnect_initial_ms == 0
            || self.feed.reconnect_max_ms < self.feed.reconnect_initial_ms
        {
            return Err(MarksError::config(
                "feed.reconnect_initial_ms must be > 0 and <= feed.reconnect_max_ms",
            ));
        }
        Ok(())
    }
}

/// Remote store connection settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the remote project, e.g. `https://xyz.example.co`
    #[serde(default)]
    pub api_url: String,
    /// Public (anonymous) API key sent as `apikey`
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// OAuth provider used by `authorize_url`
    #[serde(default = "default_oauth_provider")]
    pub oauth_provider: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            anon_key: String::new(),
            table: default_table(),
            request_timeout_secs: default_request_timeout_secs(),
            oauth_provider: default_oauth_provider(),
            redirect_url: None,
        }
    }
}

impl RemoteConfig {
    /// `api_url` without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_oauth_provider() -> String {
    "google".to_string()
}

/// Change-feed reconnection settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FeedSettings {
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

/// When the insert form's input fields are cleared.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DraftClearPolicy {
    /// Cleared as soon as the insert request is issued, whatever its outcome
    #[default]
    OnIssue,
    /// Cleared only once the server confirmed the insert
    OnSuccess,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SyncSettings {
    #[serde(default)]
    pub draft_clear_policy: DraftClearPolicy,
}
