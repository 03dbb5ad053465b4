use crate::store::LocalStore;
use chrono::Utc;
use reelshelf_models::{MediaKind, NewWatchlistItem, WatchlistItem};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Watchlist CRUD over a [`LocalStore`] key.
///
/// The store is the source of truth. The manager keeps a cached copy for the
/// UI in a `watch` channel and replaces it from storage after every mutation,
/// so the view always shows what was actually persisted, including when a
/// write failed and storage kept the previous collection.
pub struct WatchlistManager {
    store: Arc<dyn LocalStore>,
    key: String,
    view: watch::Sender<Vec<WatchlistItem>>,
}

impl WatchlistManager {
    pub fn new(store: Arc<dyn LocalStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let items = load(store.as_ref(), &key);
        let (view, _) = watch::channel(items);
        Self { store, key, view }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Full collection as currently stored, in insertion order
    pub fn list(&self) -> Vec<WatchlistItem> {
        load(self.store.as_ref(), &self.key)
    }

    /// Append an item unless its `(id, type)` pair is already present.
    ///
    /// Returns `true` only when a new entry was persisted.
    pub fn add(&self, item: NewWatchlistItem) -> bool {
        let mut items = self.list();

        if items.iter().any(|existing| existing.matches(&item.id, item.kind)) {
            debug!(id = %item.id, kind = %item.kind, "Watchlist already contains item, skipping add");
            self.reload();
            return false;
        }

        let id = item.id.clone();
        let kind = item.kind;
        items.push(item.stamp(Utc::now()));
        let persisted = self.persist(&items);
        if persisted {
            info!(operation = "watchlist_add", id = %id, kind = %kind, total = items.len(), "Added to watchlist");
        }
        self.reload();
        persisted
    }

    /// Remove the entry for `(id, type)`. Returns `true` only when an entry
    /// was found and the shorter collection was persisted.
    pub fn remove(&self, id: &str, kind: MediaKind) -> bool {
        let mut items = self.list();
        let position = match items.iter().position(|existing| existing.matches(id, kind)) {
            Some(position) => position,
            None => {
                debug!(id, kind = %kind, "Watchlist does not contain item, nothing to remove");
                self.reload();
                return false;
            }
        };

        items.remove(position);
        let persisted = self.persist(&items);
        if persisted {
            info!(operation = "watchlist_remove", id, kind = %kind, total = items.len(), "Removed from watchlist");
        }
        self.reload();
        persisted
    }

    pub fn contains(&self, id: &str, kind: MediaKind) -> bool {
        self.list().iter().any(|item| item.matches(id, kind))
    }

    /// Persist an empty collection
    pub fn clear(&self) -> bool {
        let persisted = self.persist(&[]);
        if persisted {
            info!(operation = "watchlist_clear", "Cleared watchlist");
        }
        self.reload();
        persisted
    }

    /// Cached collection as last loaded from storage
    pub fn snapshot(&self) -> Vec<WatchlistItem> {
        self.view.borrow().clone()
    }

    /// Reactive view of the cached collection
    pub fn view(&self) -> watch::Receiver<Vec<WatchlistItem>> {
        self.view.subscribe()
    }

    /// Replace the cached view with the stored collection
    pub fn reload(&self) {
        let items = self.list();
        self.view.send_if_modified(|current| {
            if *current == items {
                false
            } else {
                *current = items;
                true
            }
        });
    }

    /// Keep the view in sync with writes to the watchlist key made through
    /// other managers sharing the same store, until `shutdown` is cancelled.
    pub fn spawn_sync(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        // Subscribe before spawning so no event between now and the first poll is lost
        let mut events = self.store.subscribe();
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) if event.key == manager.key => {
                            debug!(key = %event.key, change = ?event.change, "Watchlist changed in storage, reloading view");
                            manager.reload();
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed storage events, reloading watchlist view");
                            manager.reload();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(operation = "watchlist_sync_stopped", "Watchlist sync stopped");
        })
    }

    fn persist(&self, items: &[WatchlistItem]) -> bool {
        let json = match serde_json::to_string(items) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize watchlist: {}", e);
                return false;
            }
        };

        match self.store.write(&self.key, &json) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    operation = "watchlist_persist_failed",
                    key = %self.key,
                    error = %e,
                    "Could not save watchlist, keeping previous state"
                );
                false
            }
        }
    }
}

/// Decode the stored collection. Absent or corrupt payloads are an empty
/// watchlist; duplicate pairs keep their first occurrence.
fn load(store: &dyn LocalStore, key: &str) -> Vec<WatchlistItem> {
    let raw = match store.read(key) {
        Some(raw) => raw,
        None => return Vec::new(),
    };

    let items: Vec<WatchlistItem> = match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            warn!("Watchlist corruption detected for key {}: {}. Treating as empty.", key, e);
            return Vec::new();
        }
    };

    let total = items.len();
    let mut seen = HashSet::new();
    let deduped: Vec<WatchlistItem> = items
        .into_iter()
        .filter(|item| seen.insert((item.id.clone(), item.kind)))
        .collect();
    if deduped.len() != total {
        warn!("Dropped {} duplicate watchlist entries from key {}", total - deduped.len(), key);
    }
    deduped
}
