use std::collections::{BTreeMap, HashSet};

use groups::GroupIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabs::{CreateTab, DirectoryError, GroupKey, ResourceDirectory, TabQuery, TabRef};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::payload::{collect_local, LocalView, UrlMap};

/// Export file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub tab_groups: GroupIndex,
    pub urls: UrlMap,
    pub timestamp: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("invalid import data: {0}")]
    Malformed(String),
}

/// Validated import data. Only `urls` is acted on; `tabGroups` ids belong to
/// the exporting process and are checked for shape but otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    pub urls: UrlMap,
    #[serde(default)]
    pub tab_groups: Option<BTreeMap<GroupKey, Vec<TabRef>>>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl ImportPayload {
    /// Checks the shape of untyped import data before anything is touched.
    pub fn parse(data: &Value) -> Result<Self, ImportError> {
        let Some(object) = data.as_object() else {
            return Err(ImportError::Malformed("expected a JSON object".into()));
        };
        if !object.contains_key("urls") {
            return Err(ImportError::Malformed("missing `urls` mapping".into()));
        }
        let payload = Self::deserialize(data)
            .map_err(|err| ImportError::Malformed(err.to_string()))?;
        if payload.urls.keys().any(|key| key.as_str().is_empty()) {
            return Err(ImportError::Malformed("empty domain key".into()));
        }
        Ok(payload)
    }
}

/// Per-item outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: Vec<TabRef>,
    /// URLs skipped because a tab already shows them.
    pub already_open: usize,
    /// URLs whose tab could not be opened.
    pub failed: Vec<String>,
}

/// Builds the export payload. Grouped tabs that have closed are reported in
/// the returned view's `stale` list so the caller can prune them.
pub async fn export(
    groups: &GroupIndex,
    directory: &dyn ResourceDirectory,
    timestamp: u64,
) -> Result<(ExportPayload, Vec<TabRef>), DirectoryError> {
    let LocalView {
        groups,
        urls,
        stale,
    } = collect_local(groups, directory).await?;
    debug!(groups = groups.len(), stale = stale.len(), "exporting tab groups");
    Ok((
        ExportPayload {
            tab_groups: groups,
            urls,
            timestamp,
        },
        stale,
    ))
}

/// Opens a background tab for every imported URL not already open (exact
/// string match) and files it under its domain.
pub async fn import(
    payload: &ImportPayload,
    groups: &mut GroupIndex,
    directory: &dyn ResourceDirectory,
) -> Result<ImportReport, DirectoryError> {
    let mut open: HashSet<String> = directory
        .list_tabs(TabQuery::all())
        .await?
        .into_iter()
        .filter_map(|tab| tab.url)
        .collect();

    let mut report = ImportReport::default();
    for (key, urls) in &payload.urls {
        for url in urls {
            if open.contains(url) {
                report.already_open += 1;
                continue;
            }
            match directory.create_tab(CreateTab::background(url.clone())).await {
                Ok(tab) => {
                    groups.assign(tab.id, key.clone());
                    open.insert(url.clone());
                    report.created.push(tab.id);
                }
                Err(error) => {
                    warn!(%url, %error, "failed to open imported tab");
                    report.failed.push(url.clone());
                }
            }
        }
    }
    info!(
        created = report.created.len(),
        already_open = report.already_open,
        failed = report.failed.len(),
        "imported tabs"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabs::MemoryBrowser;

    #[test]
    fn parse_requires_urls() {
        let err = ImportPayload::parse(&json!({"tabGroups": {"x.com": [1]}})).unwrap_err();
        assert!(matches!(err, ImportError::Malformed(_)));
        assert!(ImportPayload::parse(&json!([1, 2])).is_err());
        assert!(ImportPayload::parse(&json!({"urls": {"x.com": "https://x.com"}})).is_err());
        assert!(ImportPayload::parse(&json!({"urls": {"x.com": [1]}})).is_err());
    }

    #[test]
    fn parse_accepts_export_files() {
        let payload = ImportPayload::parse(&json!({
            "tabGroups": {"x.com": [10]},
            "urls": {"x.com": ["https://x.com/p"]},
            "timestamp": 1
        }))
        .unwrap();
        assert_eq!(payload.urls[&GroupKey::new("x.com")], vec!["https://x.com/p"]);
    }

    #[tokio::test]
    async fn export_then_import_into_empty_state() {
        let source = MemoryBrowser::new();
        for _ in 0..9 {
            source.close(source.open("about:blank"));
        }
        let tab = source.open("https://x.com/p");
        assert_eq!(tab, TabRef::new(10));
        let mut groups = GroupIndex::new();
        groups.assign(tab, GroupKey::new("x.com"));

        let (exported, stale) = export(&groups, &source, 42).await.unwrap();
        assert!(stale.is_empty());
        let file = serde_json::to_value(&exported).unwrap();
        assert_eq!(file["urls"], json!({"x.com": ["https://x.com/p"]}));
        assert_eq!(file["tabGroups"], json!({"x.com": [10]}));

        let target = MemoryBrowser::new();
        let mut imported = GroupIndex::new();
        let payload = ImportPayload::parse(&file).unwrap();
        let report = import(&payload, &mut imported, &target).await.unwrap();

        assert_eq!(report.created.len(), 1);
        assert_eq!(target.len(), 1);
        let created = report.created[0];
        assert_eq!(imported.get(&GroupKey::new("x.com")), Some(&[created][..]));
    }

    #[tokio::test]
    async fn import_skips_open_urls_and_records_failures() {
        let browser = MemoryBrowser::new();
        browser.open("https://x.com/p");
        browser.fail_creation_of("https://x.com/broken");
        let payload = ImportPayload::parse(&json!({
            "urls": {"x.com": [
                "https://x.com/p",
                "https://x.com/p#section",
                "https://x.com/broken",
                "https://x.com/p#section"
            ]}
        }))
        .unwrap();

        let mut groups = GroupIndex::new();
        let report = import(&payload, &mut groups, &browser).await.unwrap();
        assert_eq!(report.already_open, 2);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed, vec!["https://x.com/broken".to_string()]);
        assert_eq!(browser.len(), 2);

        let again = import(&payload, &mut groups, &browser).await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(browser.len(), 2);
    }
}
