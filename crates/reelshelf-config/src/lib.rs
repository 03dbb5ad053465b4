pub mod config;
pub mod paths;

pub use config::{Config, LoggingConfig, PollerConfig, RoutesConfig, StorageConfig, DEFAULT_VISITED_KEY, DEFAULT_WATCHLIST_KEY};
pub use paths::PathManager;
