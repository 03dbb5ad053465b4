pub mod clear;
pub mod config;
pub mod visit;
pub mod watch;
pub mod watchlist;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use reelshelf_config::{Config, PathManager};
use reelshelf_core::{FileStore, FirstVisitTracker, WatchlistManager};
use reelshelf_models::MediaKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a command needs: resolved paths, validated config and the profile store
pub struct AppContext {
    pub paths: PathManager,
    pub config: Config,
    pub config_file: PathBuf,
    pub store: Arc<FileStore>,
}

impl AppContext {
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let paths = PathManager::default();
        let config_file = config_override.unwrap_or_else(|| paths.config_file());

        let config = Config::load_or_default(&config_file)
            .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
        config
            .validate()
            .map_err(|e| eyre!("Invalid configuration in {}: {}", config_file.display(), e))?;

        let profile_dir = config.profile_dir(&paths);
        let store = Arc::new(FileStore::new(&profile_dir).with_quota(config.storage.quota()));

        Ok(Self {
            paths,
            config,
            config_file,
            store,
        })
    }

    pub fn watchlist(&self) -> WatchlistManager {
        WatchlistManager::new(self.store.clone(), self.config.storage.watchlist_key.clone())
    }

    pub fn visit_tracker(&self) -> FirstVisitTracker {
        FirstVisitTracker::new(self.store.clone(), self.config.storage.visited_key.clone())
    }
}

pub fn parse_kind(kind: &str) -> Result<MediaKind> {
    kind.parse::<MediaKind>()
        .map_err(|e| eyre!(e))
        .wrap_err("Invalid --type")
}
