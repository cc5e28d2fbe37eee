use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// A batch of key/value pairs read from or written to one storage area.
pub type Items = serde_json::Map<String, Value>;

/// Storage areas exposed by the host.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StorageArea {
    /// Device-local state.
    Local,
    /// State replicated across the user's devices.
    Synced,
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Synced => f.write_str("sync"),
        }
    }
}

/// Change notification: the keys whose values changed in an area.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub keys: Vec<String>,
}

impl StorageChange {
    pub fn touches(&self, key: &str) -> bool {
        self.keys.iter().any(|changed| changed == key)
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored value under `{key}` is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{area} storage unavailable: {reason}")]
    Unavailable { area: StorageArea, reason: String },
}

/// Key/value persistence provided by the host.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Reads the requested keys. Missing keys are absent from the result.
    async fn get(&self, area: StorageArea, keys: &[&str]) -> Result<Items, PersistenceError>;

    /// Writes all items in one operation.
    async fn set(&self, area: StorageArea, items: Items) -> Result<(), PersistenceError>;

    /// Subscribes to change notifications for both areas. Only keys whose
    /// stored value actually changed are reported.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;

    async fn get_local(&self, keys: &[&str]) -> Result<Items, PersistenceError> {
        self.get(StorageArea::Local, keys).await
    }

    async fn set_local(&self, items: Items) -> Result<(), PersistenceError> {
        self.set(StorageArea::Local, items).await
    }

    async fn get_synced(&self, keys: &[&str]) -> Result<Items, PersistenceError> {
        self.get(StorageArea::Synced, keys).await
    }

    async fn set_synced(&self, items: Items) -> Result<(), PersistenceError> {
        self.set(StorageArea::Synced, items).await
    }
}

/// Reads and decodes a single key.
pub async fn load<T: DeserializeOwned>(
    gateway: &dyn PersistenceGateway,
    area: StorageArea,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    let mut items = gateway.get(area, &[key]).await?;
    let Some(value) = items.remove(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| PersistenceError::Malformed {
            key: key.to_string(),
            source,
        })
}

/// Encodes `value` under `key` into a pending write batch.
pub fn encode_into<T: Serialize + ?Sized>(
    items: &mut Items,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    items.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(())
}
