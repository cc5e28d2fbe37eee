use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::gateway::{Items, PersistenceError, PersistenceGateway, StorageArea, StorageChange};
use crate::memory::CHANGE_CAPACITY;

/// Gateway backed by one JSON document per area inside a directory.
///
/// Writes are read-modify-write under a lock and replace the document via a
/// temporary file and rename, so a crash never leaves a half-written file.
/// Change notifications cover writes made through this instance only; edits
/// by another process to the same `sync.json` surface through periodic pulls.
#[derive(Debug)]
pub struct JsonFileGateway {
    root: PathBuf,
    lock: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            root: root.into(),
            lock: Mutex::new(()),
            changes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, area: StorageArea) -> PathBuf {
        match area {
            StorageArea::Local => self.root.join("local.json"),
            StorageArea::Synced => self.root.join("sync.json"),
        }
    }

    async fn read_area(&self, area: StorageArea) -> Result<Items, PersistenceError> {
        let path = self.path(area);
        match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Items::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Items::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileGateway {
    async fn get(&self, area: StorageArea, keys: &[&str]) -> Result<Items, PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read_area(area).await?;
        let mut found = Items::new();
        for key in keys {
            if let Some(value) = stored.remove(*key) {
                found.insert((*key).to_string(), value);
            }
        }
        Ok(found)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    async fn set(&self, area: StorageArea, items: Items) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read_area(area).await?;
        let mut changed = Vec::new();
        for (key, value) in items {
            if stored.get(&key) != Some(&value) {
                changed.push(key.clone());
                stored.insert(key, value);
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.root).await?;
        let path = self.path(area);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&stored)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(area = %area, path = %path.display(), "wrote storage document");
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            area,
            keys: changed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_directory_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = JsonFileGateway::new(dir.path().join("nested"));
        assert!(gateway.get_local(&["tabGroups"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_merge_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = JsonFileGateway::new(dir.path());

        let mut first = Items::new();
        first.insert("a".into(), json!({"x.com": [1]}));
        gateway.set_local(first).await.unwrap();

        let mut second = Items::new();
        second.insert("b".into(), json!(true));
        gateway.set_local(second).await.unwrap();

        let reopened = JsonFileGateway::new(dir.path());
        let items = reopened.get_local(&["a", "b"]).await.unwrap();
        assert_eq!(items.get("a"), Some(&json!({"x.com": [1]})));
        assert_eq!(items.get("b"), Some(&json!(true)));
        assert!(reopened.get_synced(&["a"]).await.unwrap().is_empty());
        assert!(dir.path().join("local.json").exists());
        assert!(!dir.path().join("local.json.tmp").exists());
    }

    #[tokio::test]
    async fn writes_notify_changed_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        let mut changes = gateway.subscribe();

        let mut items = Items::new();
        items.insert("settings".into(), json!({"autoSuspend": false}));
        gateway.set_local(items.clone()).await.unwrap();
        gateway.set_local(items).await.unwrap();

        let change = changes.try_recv().unwrap();
        assert_eq!(change.area, StorageArea::Local);
        assert_eq!(change.keys, vec!["settings".to_string()]);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("local.json"), b"{not json").unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        let result = gateway.get_local(&["a"]).await;
        assert!(matches!(result, Err(PersistenceError::Serialization(_))));
    }
}
