use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage key for the serialized watchlist. Changing it resets every user's watchlist.
pub const DEFAULT_WATCHLIST_KEY: &str = "watchlist";
/// Storage key for the visited flag. Changing it re-triggers onboarding for everyone.
pub const DEFAULT_VISITED_KEY: &str = "hasVisited";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Overrides the profile directory from `PathManager`
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    #[serde(default = "default_watchlist_key")]
    pub watchlist_key: String,
    #[serde(default = "default_visited_key")]
    pub visited_key: String,
    /// Total bytes the profile may hold; 0 disables the quota
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
    /// Polling cadence for cross-process changes when native file
    /// notifications are unavailable
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Marker sent in the request body so the endpoint can tell client polls
    /// from cron runs; empty sends no body
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutesConfig {
    #[serde(default = "default_welcome_route")]
    pub welcome: String,
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Force JSON logs; when unset JSON is used if stdout is not a terminal
    #[serde(default)]
    pub json: Option<bool>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_watchlist_key() -> String {
    DEFAULT_WATCHLIST_KEY.to_string()
}

fn default_visited_key() -> String {
    DEFAULT_VISITED_KEY.to_string()
}

fn default_quota_bytes() -> u64 {
    5 * 1024 * 1024 // Same as a browser's localStorage
}

fn default_watch_interval_ms() -> u64 {
    500
}

fn default_endpoint() -> String {
    "http://localhost:3000/api/auto-release".to_string()
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_trigger() -> String {
    "client-poll".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_welcome_route() -> String {
    "/welcome".to_string()
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profile_dir: None,
            watchlist_key: default_watchlist_key(),
            visited_key: default_visited_key(),
            quota_bytes: default_quota_bytes(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            endpoint: default_endpoint(),
            interval_seconds: default_interval_seconds(),
            trigger: default_trigger(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            welcome: default_welcome_route(),
            admin_prefix: default_admin_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: None,
            file: None,
        }
    }
}

impl StorageConfig {
    pub fn quota(&self) -> Option<u64> {
        (self.quota_bytes > 0).then_some(self.quota_bytes)
    }
}

impl RoutesConfig {
    /// Administrative pages drive releases themselves and are never polled from
    pub fn is_admin(&self, route: &str) -> bool {
        let prefix = self.admin_prefix.trim_end_matches('/');
        route == prefix || route.starts_with(&format!("{}/", prefix))
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file if present, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.watchlist_key.trim().is_empty() {
            return Err(anyhow::anyhow!("storage.watchlist_key cannot be empty"));
        }
        if self.storage.visited_key.trim().is_empty() {
            return Err(anyhow::anyhow!("storage.visited_key cannot be empty"));
        }
        if self.storage.watchlist_key == self.storage.visited_key {
            return Err(anyhow::anyhow!("storage.watchlist_key and storage.visited_key must differ"));
        }
        if self.storage.watch_interval_ms == 0 {
            return Err(anyhow::anyhow!("storage.watch_interval_ms must be positive"));
        }

        if self.poller.enabled {
            if self.poller.interval_seconds == 0 {
                return Err(anyhow::anyhow!("poller.interval_seconds must be positive"));
            }
            let endpoint = self.poller.endpoint.as_str();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(anyhow::anyhow!("poller.endpoint must be an http(s) URL: {}", endpoint));
            }
        }

        if !self.routes.welcome.starts_with('/') {
            return Err(anyhow::anyhow!("routes.welcome must be an absolute route"));
        }
        if !self.routes.admin_prefix.starts_with('/') {
            return Err(anyhow::anyhow!("routes.admin_prefix must be an absolute route"));
        }
        // "/" would make every page an admin page and disable polling
        if self.routes.admin_prefix.trim_end_matches('/').is_empty() {
            return Err(anyhow::anyhow!("routes.admin_prefix cannot be the site root"));
        }

        Ok(())
    }

    /// Log file for long-running commands, honouring the `logging.file` override
    pub fn log_file(&self, paths: &crate::PathManager) -> PathBuf {
        self.logging.file.clone().unwrap_or_else(|| paths.log_file())
    }

    /// Profile directory to use, honouring the `storage.profile_dir` override
    pub fn profile_dir(&self, paths: &crate::PathManager) -> PathBuf {
        self.storage
            .profile_dir
            .clone()
            .unwrap_or_else(|| paths.profile_dir())
    }
}
