//! Client configuration
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment variables (`EVENTSYNC_API_URL`, `EVENTSYNC_TOKEN`,
//! `EVENTSYNC_DB_PATH`).
//!
//! ```toml
//! [remote]
//! url = "https://api.example.com/rest/v1"
//! health_path = "/health"
//!
//! [sync]
//! auto_sync = true
//! settle_delay_ms = 1000
//! request_timeout_ms = 15000
//! page_size = 20
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::local_db::LocalDatabase;
use crate::client::sync::SyncConfig;
use crate::shared::config::{AppConfig, ConfigError};

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Default health endpoint, relative to the server URL
const DEFAULT_HEALTH_PATH: &str = "/health";

pub const ENV_API_URL: &str = "EVENTSYNC_API_URL";
pub const ENV_TOKEN: &str = "EVENTSYNC_TOKEN";
pub const ENV_DB_PATH: &str = "EVENTSYNC_DB_PATH";

/// Application configuration wrapper.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    token: Option<String>,
    db_path: PathBuf,
    sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            token: None,
            db_path: LocalDatabase::default_path(),
            sync: SyncConfig::default(),
        }
    }
}

/// On-disk config file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    remote: RemoteSection,
    sync: SyncSection,
    database: DatabaseSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RemoteSection {
    url: Option<String>,
    health_path: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncSection {
    auto_sync: Option<bool>,
    settle_delay_ms: Option<u64>,
    max_retry_attempts: Option<u32>,
    request_timeout_ms: Option<u64>,
    page_size: Option<u32>,
    probe_interval_ms: Option<u64>,
    skip_refresh_on_poor: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DatabaseSection {
    path: Option<PathBuf>,
}

impl SyncSection {
    fn apply(self, sync: &mut SyncConfig) {
        if let Some(v) = self.auto_sync {
            sync.auto_sync = v;
        }
        if let Some(ms) = self.settle_delay_ms {
            sync.settle_delay = Duration::from_millis(ms);
        }
        if let Some(v) = self.max_retry_attempts {
            sync.max_retry_attempts = v.max(1);
        }
        if let Some(ms) = self.request_timeout_ms {
            sync.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = self.page_size {
            sync.page_size = v.max(1);
        }
        if let Some(ms) = self.probe_interval_ms {
            sync.probe_interval = Duration::from_millis(ms);
        }
        if let Some(v) = self.skip_refresh_on_poor {
            sync.skip_refresh_on_poor = v;
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults, then `path`, then the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents)?;
        let mut config = Self::default();

        let mut builder = AppConfig::builder();
        if let Some(url) = file.remote.url {
            builder = builder.server_url(url);
        }
        if let Some(path) = file.remote.health_path {
            builder = builder.health_path(path);
        }
        config.app = builder.build()?;
        config.token = file.remote.token;
        if let Some(path) = file.database.path {
            config.db_path = path;
        }
        file.sync.apply(&mut config.sync);
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            let mut builder = AppConfig::builder().server_url(url);
            if let Some(path) = &self.app.health_path {
                builder = builder.health_path(path.clone());
            }
            self.app = builder.build()?;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Set the bearer token
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Get the bearer token
    pub fn get_token(&self) -> Option<&String> {
        self.token.as_ref()
    }

    /// Clear the token (logout)
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url(), path)
    }

    pub fn server_url(&self) -> &str {
        self.app.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    /// URL probed for connectivity
    pub fn health_url(&self) -> String {
        self.api_url(self.app.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn set_db_path(&mut self, path: impl Into<PathBuf>) {
        self.db_path = path.into();
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.sync
    }

    pub fn request_timeout(&self) -> Duration {
        self.sync.request_timeout
    }
}
