use crate::error::StoreError;
use crate::store::{entry_size, ChangeNotifier, LocalStore, StorageChange, StorageEvent};
use notify::event::{AccessKind, EventKind};
use notify::{Config as NotifyConfig, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const VALUE_EXTENSION: &str = "json";

/// Profile directory on disk, one `<key>.json` file per storage key.
///
/// Writes go to a uniquely named temp file in the same directory and are
/// renamed into place, so a reader never sees half a value even with several
/// processes writing the same key. [`FileStore::spawn_watcher`] picks up
/// writes made by other processes sharing the directory and republishes them
/// as [`StorageEvent`]s for local subscribers.
pub struct FileStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    notifier: ChangeNotifier,
    /// Last value this instance wrote or observed per key
    seen: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        let store = Self {
            dir: dir.to_path_buf(),
            quota_bytes: None,
            notifier: ChangeNotifier::new(),
            seen: Mutex::new(HashMap::new()),
        };
        // Baseline so only changes made after startup are reported
        let baseline: HashMap<String, String> = store
            .keys()
            .into_iter()
            .filter_map(|key| {
                let value = std::fs::read_to_string(store.key_path(&key)).ok()?;
                Some((key, value))
            })
            .collect();
        *store.seen.lock().unwrap_or_else(|e| e.into_inner()) = baseline;
        store
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, VALUE_EXTENSION))
    }

    fn value_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.key_path(key))
    }

    /// Storage key a path in the profile directory holds, if any
    fn key_for_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
            return None;
        }
        let key = path.file_stem()?.to_str()?;
        validate_key(key).ok()?;
        Some(key.to_string())
    }

    /// Keys currently present in the profile directory, sorted
    pub fn keys(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut keys: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| Self::key_for_path(&entry.path()))
            .collect();
        keys.sort();
        keys
    }

    /// Bytes currently used by every key except `exclude`
    fn usage_excluding(&self, exclude: &str) -> u64 {
        self.keys()
            .iter()
            .filter(|key| key.as_str() != exclude)
            .filter_map(|key| {
                let len = std::fs::metadata(self.key_path(key)).ok()?.len();
                Some(entry_size(key, len))
            })
            .sum()
    }

    /// Compare one key on disk with what this instance last saw and publish
    /// the difference, if there is one.
    fn check_key(&self, key: &str) -> Option<StorageEvent> {
        let change = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            let current = std::fs::read_to_string(self.key_path(key)).ok();
            let change = match (seen.get(key), &current) {
                (Some(previous), Some(now)) if previous == now => None,
                (None, None) => None,
                (_, Some(_)) => Some(StorageChange::Written),
                (Some(_), None) => Some(StorageChange::Removed),
            };
            match current {
                Some(value) => {
                    seen.insert(key.to_string(), value);
                }
                None => {
                    seen.remove(key);
                }
            }
            change
        }?;

        debug!(key, change = ?change, "External storage change detected");
        self.notifier.publish(key, change);
        Some(StorageEvent {
            key: key.to_string(),
            change,
        })
    }

    /// Compare every key against what this instance last saw and publish an
    /// event for each one another process wrote or removed.
    pub fn scan_external_changes(&self) -> Vec<StorageEvent> {
        let mut keys: BTreeSet<String> = self.keys().into_iter().collect();
        keys.extend(
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .keys()
                .cloned(),
        );
        keys.iter().filter_map(|key| self.check_key(key)).collect()
    }

    fn handle_event(&self, event: &Event) {
        // Reads and closes never change a value
        if matches!(event.kind, EventKind::Access(AccessKind::Read | AccessKind::Open(_))) {
            return;
        }
        let keys: BTreeSet<String> = event
            .paths
            .iter()
            .filter_map(|path| Self::key_for_path(path))
            .collect();
        for key in keys {
            self.check_key(&key);
        }
    }

    /// Watch the profile directory for writes made by other processes until
    /// `shutdown` is cancelled.
    ///
    /// Uses native file notifications where the platform supports them and
    /// falls back to content-comparing polling every `poll_interval`.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.dir.display(), e)))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let watcher = watch_dir(&self.dir, poll_interval, event_tx)?;
        let store = Arc::clone(self);

        Ok(tokio::spawn(async move {
            // Dropping the watcher stops notifications
            let _watcher = watcher;
            info!(
                operation = "storage_watcher_started",
                dir = %store.dir.display(),
                "Watching profile directory for external changes"
            );
            // Anything written between construction and the watch starting
            store.scan_external_changes();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = event_rx.recv() => match message {
                        Some(Ok(event)) => store.handle_event(&event),
                        Some(Err(e)) => {
                            warn!(error = %e, "Storage watch error, rescanning profile directory");
                            store.scan_external_changes();
                        }
                        None => break,
                    },
                }
            }
            debug!(operation = "storage_watcher_stopped", "Storage watcher stopped");
        }))
    }
}

type WatchMessage = notify::Result<Event>;

fn watch_dir(
    dir: &Path,
    poll_interval: Duration,
    event_tx: mpsc::UnboundedSender<WatchMessage>,
) -> Result<Box<dyn Watcher + Send>, StoreError> {
    let native_tx = event_tx.clone();
    let native = RecommendedWatcher::new(
        move |res: WatchMessage| {
            let _ = native_tx.send(res);
        },
        NotifyConfig::default(),
    )
    .and_then(|mut watcher| {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    });

    match native {
        Ok(watcher) => Ok(Box::new(watcher)),
        Err(e) => {
            warn!(
                dir = %dir.display(),
                error = %e,
                "Native file notifications unavailable, falling back to polling"
            );
            let config = NotifyConfig::default()
                .with_poll_interval(poll_interval)
                .with_compare_contents(true);
            let unavailable = |e: notify::Error| StoreError::Unavailable(format!("{}: {}", dir.display(), e));
            let mut watcher = PollWatcher::new(
                move |res: WatchMessage| {
                    let _ = event_tx.send(res);
                },
                config,
            )
            .map_err(unavailable)?;
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(unavailable)?;
            Ok(Box::new(watcher))
        }
    }
}

impl LocalStore for FileStore {
    fn read(&self, key: &str) -> Option<String> {
        let path = match self.value_path(key) {
            Ok(path) => path,
            Err(e) => {
                warn!("Refusing to read storage key: {}", e);
                return None;
            }
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage miss: {} (file does not exist)", key);
                None
            }
            Err(e) => {
                warn!("Failed to read storage file for {}: {}", key, e);
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.value_path(key)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            key: key.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.dir.display(), e)))?;

        // Held across the rename so the watcher never mistakes this write for an external one
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(quota) = self.quota_bytes {
            let needed = self.usage_excluding(key) + entry_size(key, value.len() as u64);
            if needed > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        // Atomic write: unique temp file in the same directory, then rename
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.write_all(value.as_bytes()).map_err(io_err)?;
        temp.persist(&path).map_err(|e| io_err(e.error))?;

        seen.insert(key.to_string(), value.to_string());
        drop(seen);

        debug!("Storage saved: {} ({} bytes)", key, value.len());
        self.notifier.publish(key, StorageChange::Written);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.value_path(key)?;
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        }
        seen.remove(key);
        drop(seen);

        debug!("Storage removed: {}", key);
        self.notifier.publish(key, StorageChange::Removed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.notifier.subscribe()
    }
}

/// Keys become file names, so keep them to a safe character set
fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_file_store_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("watchlist", "[]").unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.read("watchlist").as_deref(), Some("[]"));
        assert_eq!(reopened.keys(), vec!["watchlist".to_string()]);
    }

    #[test]
    fn test_missing_dir_reads_as_absent_and_is_created_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("nested").join("profile");
        let store = FileStore::new(&profile);

        assert_eq!(store.read("hasVisited"), None);
        store.write("hasVisited", "true").unwrap();
        // No temp files left behind
        assert_eq!(entries(&profile), vec!["hasVisited.json".to_string()]);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(matches!(store.write("../escape", "x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.write("", "x"), Err(StoreError::InvalidKey(_))));
        assert_eq!(store.read("a/b"), None);
    }

    #[test]
    fn test_quota_is_per_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).with_quota(Some(32));

        store.write("a", "0123456789").unwrap();
        store.write("b", "0123456789").unwrap();
        let err = store.write("c", "0123456789").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert_eq!(store.read("c"), None);

        // Overwriting an existing key only counts its new size
        store.write("a", "0123456789").unwrap();
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut events = store.subscribe();

        store.remove("watchlist").unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_scan_reports_writes_from_other_instances() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = FileStore::new(dir.path());
        let tab_b = FileStore::new(dir.path());
        let mut events = tab_b.subscribe();

        tab_a.write("watchlist", "[]").unwrap();
        let changes = tab_b.scan_external_changes();
        assert_eq!(
            changes,
            vec![StorageEvent { key: "watchlist".to_string(), change: StorageChange::Written }]
        );
        assert_eq!(events.try_recv().unwrap().key, "watchlist");

        // Nothing new since the last scan
        assert!(tab_b.scan_external_changes().is_empty());

        tab_a.remove("watchlist").unwrap();
        let changes = tab_b.scan_external_changes();
        assert_eq!(changes[0].change, StorageChange::Removed);
    }

    #[test]
    fn test_scan_detects_same_length_rewrite_with_unchanged_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        let tab_a = FileStore::new(dir.path());

        tab_a.write("watchlist", r#"[{"id":"1"}]"#).unwrap();
        let first_modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        let tab_b = FileStore::new(dir.path());

        tab_a.write("watchlist", r#"[{"id":"2"}]"#).unwrap();
        // Coarse timestamp filesystems can leave the mtime unchanged
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(first_modified)
            .unwrap();

        assert_eq!(
            tab_b.scan_external_changes(),
            vec![StorageEvent { key: "watchlist".to_string(), change: StorageChange::Written }]
        );
        assert_eq!(tab_b.read("watchlist").as_deref(), Some(r#"[{"id":"2"}]"#));
    }

    #[test]
    fn test_scan_ignores_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("watchlist", "[]").unwrap();
        assert!(store.scan_external_changes().is_empty());
    }

    #[test]
    fn test_concurrent_writers_never_fail_or_tear() {
        let dir = tempfile::tempdir().unwrap();
        let large = "a".repeat(256 * 1024);
        let small = "b".repeat(192 * 1024);

        let writers: Vec<_> = [large.clone(), small.clone()]
            .into_iter()
            .map(|value| {
                let store = FileStore::new(dir.path());
                thread::spawn(move || {
                    (0..40)
                        .filter(|_| store.write("watchlist", &value).is_err())
                        .count()
                })
            })
            .collect();

        let reader = FileStore::new(dir.path());
        let mut torn = 0;
        while !writers.iter().all(|w| w.is_finished()) {
            if let Some(value) = reader.read("watchlist") {
                if value != large && value != small {
                    torn += 1;
                }
            }
        }

        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(failures, 0);
        assert_eq!(torn, 0);
        assert_eq!(entries(dir.path()), vec!["watchlist.json".to_string()]);
    }

    #[tokio::test]
    async fn test_watcher_publishes_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileStore::new(dir.path());
        let watched = Arc::new(FileStore::new(dir.path()));
        let mut events = watched.subscribe();

        let shutdown = CancellationToken::new();
        let handle = watched
            .spawn_watcher(Duration::from_millis(10), shutdown.clone())
            .unwrap();

        writer.write("hasVisited", "true").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("watcher should publish")
            .unwrap();
        assert_eq!(event.key, "hasVisited");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_does_not_echo_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let shutdown = CancellationToken::new();
        let handle = store
            .spawn_watcher(Duration::from_millis(10), shutdown.clone())
            .unwrap();
        let mut events = store.subscribe();

        store.write("watchlist", "[]").unwrap();
        assert_eq!(events.recv().await.unwrap().change, StorageChange::Written);

        let echo = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(echo.is_err());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
