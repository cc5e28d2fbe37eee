use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tabs::{TabRef, TabSnapshot};

pub const RECENT_TABS_LIMIT: usize = 10;

/// Most-recently-activated tabs, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentTabs {
    entries: VecDeque<TabSnapshot>,
}

impl RecentTabs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `tab` to the front, dropping any older entry for the same id and
    /// anything beyond `limit`.
    pub fn touch(&mut self, tab: TabSnapshot, limit: usize) {
        self.entries.retain(|entry| entry.id != tab.id);
        self.entries.push_front(tab);
        self.entries.truncate(limit);
    }

    pub fn remove(&mut self, tab: TabRef) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != tab);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabSnapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
