use std::collections::HashMap;
use std::sync::Arc;

use groups::GroupIndex;
use storage::{encode_into, keys, Items, PersistenceError, PersistenceGateway};
use tabs::{CreateTab, DirectoryError, GroupKey, ResourceDirectory, TabQuery, TabRef};
use thiserror::Error;
use tracing::{debug, info, warn};
use util::Clock;

use crate::payload::{collect_local, SyncPayload};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Whether the synced area was written.
    pub written: bool,
    /// Grouped tabs found closed while building the payload.
    pub stale: Vec<TabRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Open local tabs filed into a group by the merge.
    pub grouped: Vec<TabRef>,
    /// Tabs opened for remote URLs.
    pub created: Vec<TabRef>,
    /// Remote URLs that could not be opened.
    pub failed: Vec<String>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.grouped.is_empty() || !self.created.is_empty()
    }
}

/// Keeps the local group index and the synced payload converging.
///
/// Merging is a union: nothing is ever removed because the other side lacks
/// it. A tab closed on one device comes back on the next pull while another
/// device still lists it.
pub struct SyncReconciler {
    directory: Arc<dyn ResourceDirectory>,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    last_remote: Option<SyncPayload>,
}

impl SyncReconciler {
    pub fn new(
        directory: Arc<dyn ResourceDirectory>,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            gateway,
            clock,
            last_remote: None,
        }
    }

    /// Last payload read from or written to the synced area.
    pub fn last_remote(&self) -> Option<&SyncPayload> {
        self.last_remote.as_ref()
    }

    /// Reads the synced payload. `None` if nothing was ever pushed.
    pub async fn fetch_remote(&self) -> Result<Option<SyncPayload>, SyncError> {
        let mut items = self
            .gateway
            .get_synced(&[keys::TAB_GROUPS, keys::URLS, keys::LAST_SYNC_TIME])
            .await?;
        if !items.contains_key(keys::TAB_GROUPS) && !items.contains_key(keys::URLS) {
            return Ok(None);
        }

        let mut payload = SyncPayload::default();
        if let Some(raw) = items.remove(keys::TAB_GROUPS) {
            payload.tab_groups = decode(keys::TAB_GROUPS, raw)?;
        }
        if let Some(raw) = items.remove(keys::URLS) {
            payload.urls = decode(keys::URLS, raw)?;
        }
        payload.last_sync_time = items
            .get(keys::LAST_SYNC_TIME)
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        Ok(Some(payload))
    }

    /// Writes the local groups to the synced area if they differ from the
    /// last known remote payload.
    pub async fn push(&mut self, groups: &GroupIndex) -> Result<PushOutcome, SyncError> {
        let view = collect_local(groups, self.directory.as_ref()).await?;

        if self.last_remote.is_none() {
            self.last_remote = self.fetch_remote().await?;
        }
        let unchanged = self
            .last_remote
            .as_ref()
            .is_some_and(|remote| remote.same_content(&view.groups, &view.urls));
        if unchanged {
            debug!("sync payload unchanged; skipping push");
            return Ok(PushOutcome {
                written: false,
                stale: view.stale,
            });
        }

        let payload = SyncPayload {
            tab_groups: view.groups,
            urls: view.urls,
            last_sync_time: self.clock.now_millis(),
        };
        let mut items = Items::new();
        encode_into(&mut items, keys::TAB_GROUPS, &payload.tab_groups)?;
        encode_into(&mut items, keys::URLS, &payload.urls)?;
        encode_into(&mut items, keys::LAST_SYNC_TIME, &payload.last_sync_time)?;
        self.gateway.set_synced(items).await?;

        info!(groups = payload.tab_groups.len(), "pushed tab groups");
        self.last_remote = Some(payload);
        Ok(PushOutcome {
            written: true,
            stale: view.stale,
        })
    }

    /// Fetches the synced payload and merges it into `groups`.
    pub async fn pull(&mut self, groups: &mut GroupIndex) -> Result<MergeReport, SyncError> {
        let Some(remote) = self.fetch_remote().await? else {
            return Ok(MergeReport::default());
        };
        let report = self.merge(&remote, groups).await?;
        self.last_remote = Some(remote);
        Ok(report)
    }

    /// Union-merges `remote` into `groups`.
    ///
    /// For each remote domain, remote tab ids that are open here, show that
    /// domain and are not grouped elsewhere are appended first, in the remote
    /// order. Then the domain's URLs are walked in their remote order: an open
    /// ungrouped tab showing the URL is adopted, and a URL open nowhere gets a
    /// new background tab. The payload keeps ids and URLs as separate lists,
    /// so adopted ids always precede URL-driven entries. Existing members keep
    /// their order. Applying the same payload again changes nothing.
    pub async fn merge(
        &self,
        remote: &SyncPayload,
        groups: &mut GroupIndex,
    ) -> Result<MergeReport, SyncError> {
        let open = self.directory.list_tabs(TabQuery::all()).await?;
        let mut by_url: HashMap<String, TabRef> = HashMap::new();
        let mut keys_by_tab: HashMap<TabRef, Option<GroupKey>> = HashMap::new();
        for tab in &open {
            if let Some(url) = &tab.url {
                by_url.entry(url.clone()).or_insert(tab.id);
            }
            keys_by_tab.insert(tab.id, tab.group_key());
        }

        let mut report = MergeReport::default();
        for domain in remote.domains() {
            for tab in remote.tab_groups.get(&domain).unwrap_or_default() {
                let shows_domain = keys_by_tab
                    .get(tab)
                    .is_some_and(|key| key.as_ref() == Some(&domain));
                if shows_domain && groups.group_of(*tab).is_none() {
                    groups.assign(*tab, domain.clone());
                    report.grouped.push(*tab);
                }
            }

            let urls = remote.urls.get(&domain).map(Vec::as_slice).unwrap_or_default();
            for url in urls {
                if let Some(existing) = by_url.get(url) {
                    if groups.group_of(*existing).is_none() {
                        groups.assign(*existing, domain.clone());
                        report.grouped.push(*existing);
                    }
                    continue;
                }
                match self.directory.create_tab(CreateTab::background(url.clone())).await {
                    Ok(tab) => {
                        groups.assign(tab.id, domain.clone());
                        by_url.insert(url.clone(), tab.id);
                        report.created.push(tab.id);
                    }
                    Err(error) => {
                        warn!(%url, %domain, %error, "failed to open synced tab");
                        report.failed.push(url.clone());
                    }
                }
            }
        }

        if report.changed() {
            info!(
                grouped = report.grouped.len(),
                created = report.created.len(),
                "merged remote tab groups"
            );
        }
        Ok(report)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    key: &str,
    raw: serde_json::Value,
) -> Result<T, PersistenceError> {
    serde_json::from_value(raw).map_err(|source| PersistenceError::Malformed {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::{MemoryGateway, StorageArea};
    use tabs::MemoryBrowser;
    use util::ManualClock;

    struct Fixture {
        browser: Arc<MemoryBrowser>,
        gateway: Arc<MemoryGateway>,
        reconciler: SyncReconciler,
    }

    fn fixture() -> Fixture {
        let browser = Arc::new(MemoryBrowser::new());
        let gateway = Arc::new(MemoryGateway::new());
        let reconciler = SyncReconciler::new(
            browser.clone(),
            gateway.clone(),
            Arc::new(ManualClock::new(1_000)),
        );
        Fixture {
            browser,
            gateway,
            reconciler,
        }
    }

    async fn seed_remote(gateway: &MemoryGateway, payload: serde_json::Value) {
        let items = payload.as_object().cloned().unwrap_or_default();
        gateway.set_synced(items).await.unwrap();
    }

    fn key(domain: &str) -> GroupKey {
        GroupKey::new(domain)
    }

    #[tokio::test]
    async fn union_merge_appends_and_creates() {
        let mut f = fixture();
        let one = f.browser.open("https://a.com/1");
        let two = f.browser.open("https://a.com/2");
        let mut groups = GroupIndex::new();
        groups.extend(&key("a.com"), [one, two]);

        seed_remote(
            &f.gateway,
            json!({
                "tabGroups": {"a.com": [2, 3]},
                "urls": {"a.com": ["https://a.com/2", "https://a.com/3"]},
                "lastSyncTime": 1
            }),
        )
        .await;

        let report = f.reconciler.pull(&mut groups).await.unwrap();
        assert_eq!(report.created, vec![TabRef::new(3)]);
        assert_eq!(
            groups.get(&key("a.com")),
            Some(&[one, two, TabRef::new(3)][..])
        );

        let before = groups.clone();
        let again = f.reconciler.pull(&mut groups).await.unwrap();
        assert!(!again.changed());
        assert_eq!(groups, before);
        assert_eq!(f.browser.len(), 3);
    }

    #[tokio::test]
    async fn remote_only_domains_open_missing_urls() {
        let mut f = fixture();
        let open = f.browser.open("https://b.com/read");
        let mut groups = GroupIndex::new();

        seed_remote(
            &f.gateway,
            json!({
                "tabGroups": {"b.com": [70, 71]},
                "urls": {"b.com": ["https://b.com/read", "https://b.com/new"]}
            }),
        )
        .await;

        let report = f.reconciler.pull(&mut groups).await.unwrap();
        assert_eq!(report.grouped, vec![open]);
        assert_eq!(report.created.len(), 1);
        assert_eq!(groups.get(&key("b.com")).map(<[TabRef]>::len), Some(2));
    }

    #[tokio::test]
    async fn merge_appends_ids_then_urls_in_remote_order() {
        let mut f = fixture();
        let by_id = f.browser.open("https://a.com/id");
        let by_url = f.browser.open("https://a.com/url");
        let mut groups = GroupIndex::new();

        seed_remote(
            &f.gateway,
            json!({
                "tabGroups": {"a.com": [by_id.get()]},
                "urls": {"a.com": ["https://a.com/new", "https://a.com/url"]}
            }),
        )
        .await;

        let report = f.reconciler.pull(&mut groups).await.unwrap();
        let created = report.created[0];
        assert_eq!(
            groups.get(&key("a.com")),
            Some(&[by_id, created, by_url][..])
        );
    }

    #[tokio::test]
    async fn foreign_ids_never_capture_unrelated_tabs() {
        let mut f = fixture();
        let local = f.browser.open("https://other.org");
        let mut groups = GroupIndex::new();

        seed_remote(&f.gateway, json!({"tabGroups": {"a.com": [local.get()]}})).await;
        let report = f.reconciler.pull(&mut groups).await.unwrap();
        assert!(!report.changed());
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn push_writes_only_on_change() {
        let mut f = fixture();
        let tab = f.browser.open("https://x.com/p");
        let mut groups = GroupIndex::new();
        groups.assign(tab, key("x.com"));

        let first = f.reconciler.push(&groups).await.unwrap();
        assert!(first.written);
        assert_eq!(
            f.gateway.peek(StorageArea::Synced, keys::URLS),
            Some(json!({"x.com": ["https://x.com/p"]}))
        );
        assert_eq!(f.gateway.peek(StorageArea::Synced, keys::LAST_SYNC_TIME), Some(json!(1_000)));

        let writes = f.gateway.write_count();
        let second = f.reconciler.push(&groups).await.unwrap();
        assert!(!second.written);
        assert_eq!(f.gateway.write_count(), writes);

        f.browser.navigate(tab, "https://x.com/q");
        assert!(f.reconciler.push(&groups).await.unwrap().written);
    }

    #[tokio::test]
    async fn push_compares_against_stored_payload_on_first_run() {
        let mut f = fixture();
        let tab = f.browser.open("https://x.com/p");
        let mut groups = GroupIndex::new();
        groups.assign(tab, key("x.com"));
        seed_remote(
            &f.gateway,
            json!({
                "tabGroups": {"x.com": [tab.get()]},
                "urls": {"x.com": ["https://x.com/p"]},
                "lastSyncTime": 7
            }),
        )
        .await;

        let outcome = f.reconciler.push(&groups).await.unwrap();
        assert!(!outcome.written);
        assert_eq!(f.reconciler.last_remote().map(|p| p.last_sync_time), Some(7));
    }

    #[tokio::test]
    async fn push_reports_closed_tabs() {
        let mut f = fixture();
        let tab = f.browser.open("https://x.com/p");
        let mut groups = GroupIndex::new();
        groups.assign(tab, key("x.com"));
        f.browser.close(tab);

        let outcome = f.reconciler.push(&groups).await.unwrap();
        assert_eq!(outcome.stale, vec![tab]);
    }

    #[tokio::test]
    async fn empty_synced_area_is_a_noop_pull() {
        let mut f = fixture();
        let mut groups = GroupIndex::new();
        let report = f.reconciler.pull(&mut groups).await.unwrap();
        assert_eq!(report, MergeReport::default());
        assert!(f.reconciler.last_remote().is_none());
    }
}
