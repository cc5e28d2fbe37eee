use std::sync::Arc;

use groups::GroupIndex;
use serde::{Deserialize, Serialize};
use tabs::{CreateTab, DirectoryError, GroupKey, ResourceDirectory, TabQuery, TabSnapshot};
use thiserror::Error;
use tracing::{debug, info, warn};
use util::Clock;

use crate::gateway::{encode_into, Items, PersistenceError, PersistenceGateway};
use crate::keys;

/// One tab in a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub group: Option<GroupKey>,
    #[serde(default)]
    pub captured_at: u64,
}

/// Full capture of the open tabs. Each capture replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub entries: Vec<SessionEntry>,
    pub captured_at: u64,
}

impl SessionSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not list tabs: {0}")]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A tab reopened by [`SessionStore::restore`], with the group it was saved in.
#[derive(Debug, Clone)]
pub struct RestoredTab {
    pub tab: TabSnapshot,
    pub group: Option<GroupKey>,
}

#[derive(Debug, Clone)]
pub struct RestoreFailure {
    pub url: String,
    pub error: DirectoryError,
}

/// Outcome of a restore. Failed entries do not stop the rest.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<RestoredTab>,
    pub failed: Vec<RestoreFailure>,
}

/// Captures and restores whole-session snapshots.
///
/// Restore is additive: it opens every saved tab in order and never closes or
/// deduplicates against tabs that are already open.
pub struct SessionStore {
    directory: Arc<dyn ResourceDirectory>,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(
        directory: Arc<dyn ResourceDirectory>,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            gateway,
            clock,
        }
    }

    /// Snapshots every open tab and replaces the stored session.
    pub async fn capture(&self, groups: &GroupIndex) -> Result<SessionSnapshot, SessionError> {
        let tabs = self.directory.list_tabs(TabQuery::all()).await?;
        let captured_at = self.clock.now_millis();

        let entries: Vec<SessionEntry> = tabs
            .into_iter()
            .filter_map(|tab| {
                let Some(url) = tab.url else {
                    debug!(tab = %tab.id, "skipping tab without url");
                    return None;
                };
                Some(SessionEntry {
                    url,
                    title: tab.title,
                    pinned: tab.pinned,
                    group: groups.group_of(tab.id).cloned(),
                    captured_at,
                })
            })
            .collect();

        let mut items = Items::new();
        encode_into(&mut items, keys::SAVED_SESSION, &entries)?;
        encode_into(&mut items, keys::LAST_SAVED, &captured_at)?;
        self.gateway.set_local(items).await?;

        debug!(tabs = entries.len(), captured_at, "captured session");
        Ok(SessionSnapshot {
            entries,
            captured_at,
        })
    }

    /// Loads the stored session, if one was ever captured.
    pub async fn load(&self) -> Result<Option<SessionSnapshot>, PersistenceError> {
        let mut items = self
            .gateway
            .get_local(&[keys::SAVED_SESSION, keys::LAST_SAVED])
            .await?;

        let Some(raw) = items.remove(keys::SAVED_SESSION) else {
            return Ok(None);
        };
        let entries: Vec<SessionEntry> =
            serde_json::from_value(raw).map_err(|source| PersistenceError::Malformed {
                key: keys::SAVED_SESSION.to_string(),
                source,
            })?;
        let captured_at = items
            .get(keys::LAST_SAVED)
            .and_then(|value| value.as_u64())
            .unwrap_or_else(|| entries.iter().map(|entry| entry.captured_at).max().unwrap_or(0));

        Ok(Some(SessionSnapshot {
            entries,
            captured_at,
        }))
    }

    /// Reopens every entry of `snapshot` in order, as background tabs.
    pub async fn restore(&self, snapshot: &SessionSnapshot) -> RestoreReport {
        let mut report = RestoreReport::default();
        for entry in &snapshot.entries {
            let request = CreateTab {
                url: entry.url.clone(),
                pinned: entry.pinned,
                active: false,
            };
            match self.directory.create_tab(request).await {
                Ok(tab) => report.restored.push(RestoredTab {
                    tab,
                    group: entry.group.clone(),
                }),
                Err(error) => {
                    warn!(url = %entry.url, %error, "failed to restore tab");
                    report.failed.push(RestoreFailure {
                        url: entry.url.clone(),
                        error,
                    });
                }
            }
        }
        info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "restored session"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryGateway, StorageArea};
    use serde_json::json;
    use tabs::{MemoryBrowser, TabRef};
    use util::ManualClock;

    fn store(
        browser: &Arc<MemoryBrowser>,
        gateway: &Arc<MemoryGateway>,
    ) -> SessionStore {
        SessionStore::new(
            browser.clone(),
            gateway.clone(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    #[tokio::test]
    async fn capture_replaces_previous_snapshot() {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        let store = store(&browser, &gateway);

        let first = browser.open("https://a.com/1");
        browser.open("https://b.com");
        let mut groups = GroupIndex::new();
        groups.assign(first, GroupKey::new("a.com"));

        let snapshot = store.capture(&groups).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries[0].group, Some(GroupKey::new("a.com")));
        assert_eq!(snapshot.entries[1].group, None);
        assert_eq!(
            gateway.peek(StorageArea::Local, keys::LAST_SAVED),
            Some(json!(1_700_000_000_000u64))
        );

        browser.close(first);
        store.capture(&groups).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0].url, "https://b.com");
    }

    #[tokio::test]
    async fn restore_is_additive_and_ordered() {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        let store = store(&browser, &gateway);
        browser.open("https://a.com");

        let snapshot = SessionSnapshot {
            entries: vec![
                SessionEntry {
                    url: "https://a.com".into(),
                    title: "A".into(),
                    pinned: true,
                    group: Some(GroupKey::new("a.com")),
                    captured_at: 1,
                },
                SessionEntry {
                    url: "https://b.com".into(),
                    title: "B".into(),
                    pinned: false,
                    group: None,
                    captured_at: 1,
                },
            ],
            captured_at: 1,
        };

        let report = store.restore(&snapshot).await;
        assert_eq!(report.restored.len(), 2);
        assert_eq!(browser.len(), 3);
        assert_eq!(report.restored[0].tab.id, TabRef::new(2));
        assert!(report.restored[0].tab.pinned);
        assert_eq!(report.restored[1].tab.url.as_deref(), Some("https://b.com"));
    }

    #[tokio::test]
    async fn restore_continues_past_failures() {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        let store = store(&browser, &gateway);
        browser.fail_creation_of("https://down.test");

        let entry = |url: &str| SessionEntry {
            url: url.into(),
            title: String::new(),
            pinned: false,
            group: None,
            captured_at: 0,
        };
        let snapshot = SessionSnapshot {
            entries: vec![entry("https://down.test"), entry("https://up.test")],
            captured_at: 0,
        };

        let report = store.restore(&snapshot).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "https://down.test");
        assert_eq!(report.restored.len(), 1);
    }

    #[tokio::test]
    async fn loads_sessions_saved_without_timestamps() {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        let mut items = Items::new();
        items.insert(
            keys::SAVED_SESSION.into(),
            json!([{"url": "https://a.com", "title": "A", "pinned": false}]),
        );
        gateway.set_local(items).await.unwrap();

        let loaded = store(&browser, &gateway).load().await.unwrap().unwrap();
        assert_eq!(loaded.captured_at, 0);
        assert_eq!(loaded.entries[0].group, None);
    }

    #[tokio::test]
    async fn missing_session_loads_as_none() {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        assert!(store(&browser, &gateway).load().await.unwrap().is_none());
    }
}
