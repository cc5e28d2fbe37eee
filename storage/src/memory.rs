use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::gateway::{Items, PersistenceError, PersistenceGateway, StorageArea, StorageChange};

pub(crate) const CHANGE_CAPACITY: usize = 64;

/// In-process gateway with change notifications.
///
/// Only keys whose value actually changed are reported, so writing back an
/// unchanged value produces no event.
#[derive(Debug)]
pub struct MemoryGateway {
    areas: Mutex<HashMap<StorageArea, Items>>,
    changes: broadcast::Sender<StorageChange>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            areas: Mutex::new(HashMap::new()),
            changes,
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent `set` fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored value, bypassing the async interface.
    pub fn peek(&self, area: StorageArea, key: &str) -> Option<serde_json::Value> {
        self.areas
            .lock()
            .get(&area)
            .and_then(|items| items.get(key))
            .cloned()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn get(&self, area: StorageArea, keys: &[&str]) -> Result<Items, PersistenceError> {
        let areas = self.areas.lock();
        let mut found = Items::new();
        if let Some(items) = areas.get(&area) {
            for key in keys {
                if let Some(value) = items.get(*key) {
                    found.insert((*key).to_string(), value.clone());
                }
            }
        }
        Ok(found)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    async fn set(&self, area: StorageArea, items: Items) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable {
                area,
                reason: "writes disabled".to_string(),
            });
        }

        let changed: Vec<String> = {
            let mut areas = self.areas.lock();
            let stored = areas.entry(area).or_default();
            let mut changed = Vec::new();
            for (key, value) in items {
                if stored.get(&key) != Some(&value) {
                    changed.push(key.clone());
                    stored.insert(key, value);
                }
            }
            changed
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        if !changed.is_empty() {
            // No subscribers is fine.
            let _ = self.changes.send(StorageChange {
                area,
                keys: changed,
            });
        }
        Ok(())
    }
}
