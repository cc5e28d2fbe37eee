use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User settings persisted under `settings`.
///
/// Missing fields take their defaults, so settings written by older builds
/// (or by the popup, which only knows some of them) still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_suspend: bool,
    pub auto_group: bool,
    pub sync_enabled: bool,
    pub idle_timeout_minutes: u64,
    pub max_suspended: usize,
}

impl Settings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes.max(1) * 60)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_suspend: true,
            auto_group: true,
            sync_enabled: false,
            idle_timeout_minutes: 30,
            max_suspended: 50,
        }
    }
}
