use std::collections::{BTreeMap, HashMap};

use groups::GroupIndex;
use serde::{Deserialize, Serialize};
use tabs::{DirectoryError, GroupKey, ResourceDirectory, TabQuery, TabRef, TabSnapshot};

/// URLs per domain, in group order.
pub type UrlMap = BTreeMap<GroupKey, Vec<String>>;

/// Group state as stored in the synced area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default)]
    pub tab_groups: GroupIndex,
    #[serde(default)]
    pub urls: UrlMap,
    #[serde(default)]
    pub last_sync_time: u64,
}

impl SyncPayload {
    /// Structural equality, ignoring the timestamp.
    pub fn same_content(&self, groups: &GroupIndex, urls: &UrlMap) -> bool {
        &self.tab_groups == groups && &self.urls == urls
    }

    /// Every domain mentioned by either mapping, in key order.
    pub fn domains(&self) -> Vec<GroupKey> {
        let mut domains: Vec<GroupKey> = self
            .tab_groups
            .iter()
            .map(|(key, _)| key.clone())
            .chain(self.urls.keys().cloned())
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }
}

/// The group index restricted to tabs that are still open, with their URLs.
#[derive(Debug, Clone, Default)]
pub struct LocalView {
    pub groups: GroupIndex,
    pub urls: UrlMap,
    /// Grouped tabs the host no longer knows about.
    pub stale: Vec<TabRef>,
}

/// Resolves every grouped tab against the host in one listing.
pub async fn collect_local(
    groups: &GroupIndex,
    directory: &dyn ResourceDirectory,
) -> Result<LocalView, DirectoryError> {
    let open: HashMap<TabRef, TabSnapshot> = directory
        .list_tabs(TabQuery::all())
        .await?
        .into_iter()
        .map(|tab| (tab.id, tab))
        .collect();

    let mut view = LocalView::default();
    for (key, members) in groups.iter() {
        let mut live = Vec::new();
        let mut urls = Vec::new();
        for tab in members {
            match open.get(tab) {
                Some(snapshot) => {
                    live.push(*tab);
                    if let Some(url) = &snapshot.url {
                        urls.push(url.clone());
                    }
                }
                None => view.stale.push(*tab),
            }
        }
        if !live.is_empty() {
            view.groups.extend(key, live);
        }
        if !urls.is_empty() {
            view.urls.insert(key.clone(), urls);
        }
    }
    Ok(view)
}
