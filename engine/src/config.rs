use std::time::Duration;

use serde::{Deserialize, Serialize};
use storage::RECENT_TABS_LIMIT;

/// Process-level configuration. User-facing knobs live in
/// [`storage::Settings`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub snapshot_interval_secs: u64,
    pub sync_interval_secs: u64,
    /// Reopen the saved session during `init`.
    pub restore_on_startup: bool,
    pub recent_limit: usize,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 5 * 60,
            sync_interval_secs: 5 * 60,
            restore_on_startup: true,
            recent_limit: RECENT_TABS_LIMIT,
        }
    }
}
