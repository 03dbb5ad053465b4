use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageChange {
    Written,
    Removed,
}

/// Published after a key was successfully written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub change: StorageChange,
}

/// Durable key-value storage scoped to one client profile.
///
/// `read` never fails: missing keys and unreadable values are both `None`.
/// `write` and `remove` report failures instead of panicking so callers can
/// treat them as no-ops. Every successful mutation is published to
/// subscribers, which is how separate instances sharing a profile stay in
/// sync.
pub trait LocalStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Fan-out of storage events to every subscriber of one store.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    sender: broadcast::Sender<StorageEvent>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, key: &str, change: StorageChange) {
        // No subscribers is fine
        let _ = self.sender.send(StorageEvent {
            key: key.to_string(),
            change,
        });
    }
}

/// Bytes a key/value pair counts against the quota
pub(crate) fn entry_size(key: &str, value_len: u64) -> u64 {
    key.len() as u64 + value_len
}

/// In-memory store with the same quota and notification behaviour as
/// [`crate::FileStore`]. Used in tests and as the store of last resort when
/// the profile directory cannot be used.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
    available: AtomicBool,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: None,
            available: AtomicBool::new(true),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Simulate storage that rejects every mutation (e.g. private browsing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

            if let Some(quota) = self.quota_bytes {
                let others: u64 = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| entry_size(k, v.len() as u64))
                    .sum();
                let needed = others + entry_size(key, value.len() as u64);
                if needed > quota {
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        quota,
                    });
                }
            }

            entries.insert(key.to_string(), value.to_string());
        }

        debug!(key, bytes = value.len(), "Memory store write");
        self.notifier.publish(key, StorageChange::Written);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(key).is_some()
        };
        if removed {
            self.notifier.publish(key, StorageChange::Removed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.notifier.subscribe()
    }
}
