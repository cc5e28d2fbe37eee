//! Storage keys. Names match the JSON layout shared with the popup UI.

pub const TAB_GROUPS: &str = "tabGroups";
pub const SUSPENDED_TABS: &str = "suspendedTabs";
pub const SAVED_SESSION: &str = "savedSession";
pub const LAST_SAVED: &str = "lastSaved";
pub const SETTINGS: &str = "settings";
pub const RECENT_TABS: &str = "recentTabs";

// Synced area.
pub const URLS: &str = "urls";
pub const LAST_SYNC_TIME: &str = "lastSyncTime";
