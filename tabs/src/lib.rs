use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;

pub use memory::MemoryBrowser;

/// Host identifier for a tab. Stable for the tab's lifetime and never reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabRef(u64);

impl TabRef {
    /// Creates a new `TabRef` from a raw numeric value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host identifier for a browser window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowRef(u64);

impl WindowRef {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grouping key: the host component of a tab's URL.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Wraps an already-derived domain string.
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    /// Derives the key from a URL. URLs that fail to parse or carry no host
    /// (`about:blank`, `data:` URLs) are not grouped.
    pub fn from_url(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        let host = parsed.host_str()?;
        if host.is_empty() {
            return None;
        }
        Some(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of a tab as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: TabRef,
    pub window_id: WindowRef,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub discarded: bool,
}

impl TabSnapshot {
    /// Returns the grouping key for the tab's current URL.
    pub fn group_key(&self) -> Option<GroupKey> {
        self.url.as_deref().and_then(GroupKey::from_url)
    }
}

/// Fields reported as changed by a host tab-update notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabChange {
    pub url: Option<String>,
    pub pinned: Option<bool>,
    pub audible: Option<bool>,
}

impl TabChange {
    pub fn navigated(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Filter for `ResourceDirectory::list_tabs`. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabQuery {
    pub active: Option<bool>,
    pub window: Option<WindowRef>,
}

impl TabQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn inactive() -> Self {
        Self {
            active: Some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, tab: &TabSnapshot) -> bool {
        self.active.map_or(true, |active| tab.active == active)
            && self.window.map_or(true, |window| tab.window_id == window)
    }
}

/// Parameters for opening a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTab {
    pub url: String,
    pub pinned: bool,
    pub active: bool,
}

impl CreateTab {
    /// A non-pinned tab opened without stealing focus.
    pub fn background(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pinned: false,
            active: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The tab closed before the request reached the host.
    #[error("tab {0} no longer exists")]
    NotFound(TabRef),
    #[error("host rejected the request: {0}")]
    Host(String),
}

impl DirectoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Host primitives for listing, opening and discarding tabs.
///
/// Change notifications are not part of this trait; the host delivers them as
/// events to the engine's channel.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Lists the open tabs matching `query`, in host order.
    async fn list_tabs(&self, query: TabQuery) -> Result<Vec<TabSnapshot>, DirectoryError>;

    /// Returns the current snapshot for a tab.
    async fn get_tab(&self, tab: TabRef) -> Result<TabSnapshot, DirectoryError>;

    /// Opens a new tab.
    async fn create_tab(&self, request: CreateTab) -> Result<TabSnapshot, DirectoryError>;

    /// Releases the tab's content while keeping its entry.
    async fn discard_tab(&self, tab: TabRef) -> Result<(), DirectoryError>;

    /// Makes the tab the foreground tab of its window.
    async fn activate_tab(&self, tab: TabRef) -> Result<(), DirectoryError>;

    /// Raises and focuses a window.
    async fn focus_window(&self, window: WindowRef) -> Result<(), DirectoryError>;
}
