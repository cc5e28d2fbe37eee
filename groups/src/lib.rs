//! Domain grouping index.
//!
//! Maps a [`GroupKey`] to the ordered tabs currently showing that domain. A
//! tab belongs to at most one group and empty groups are dropped as soon as
//! they empty out, so the persisted form never carries stale keys.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use tabs::{GroupKey, TabRef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GroupIndex {
    groups: BTreeMap<GroupKey, Vec<TabRef>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from raw persisted or remote data, restoring the
    /// invariants: duplicates collapse to their first occurrence, a tab listed
    /// under several keys stays in the first key (in key order), and empty
    /// groups are dropped.
    pub fn from_groups<I, V>(groups: I) -> Self
    where
        I: IntoIterator<Item = (GroupKey, V)>,
        V: IntoIterator<Item = TabRef>,
    {
        let sorted: BTreeMap<GroupKey, Vec<TabRef>> = groups
            .into_iter()
            .map(|(key, tabs)| (key, tabs.into_iter().collect()))
            .collect();

        let mut seen = HashSet::new();
        let mut index = Self::new();
        for (key, tabs) in sorted {
            let members: Vec<TabRef> = tabs.into_iter().filter(|tab| seen.insert(*tab)).collect();
            if !members.is_empty() {
                index.groups.insert(key, members);
            }
        }
        index
    }

    /// Moves `tab` into `key`'s group. Returns `true` if the index changed.
    ///
    /// Re-assigning a tab to the group it already occupies is a no-op and keeps
    /// its position.
    pub fn assign(&mut self, tab: TabRef, key: GroupKey) -> bool {
        if self.group_of(tab) == Some(&key) {
            return false;
        }
        self.remove(tab);
        self.groups.entry(key).or_default().push(tab);
        true
    }

    /// Removes `tab` from whichever group holds it, returning that group's key.
    pub fn remove(&mut self, tab: TabRef) -> Option<GroupKey> {
        let key = self.group_of(tab)?.clone();
        let emptied = match self.groups.get_mut(&key) {
            Some(members) => {
                members.retain(|member| *member != tab);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.groups.remove(&key);
        }
        Some(key)
    }

    /// Drops every tab not in `valid`. Returns the removed tabs in index order.
    pub fn prune(&mut self, valid: &HashSet<TabRef>) -> Vec<TabRef> {
        let mut removed = Vec::new();
        self.groups.retain(|_, members| {
            members.retain(|tab| {
                let keep = valid.contains(tab);
                if !keep {
                    removed.push(*tab);
                }
                keep
            });
            !members.is_empty()
        });
        removed
    }

    /// Appends tabs to `key` in order, skipping any already in the group.
    /// Tabs grouped under a different key are moved.
    pub fn extend(&mut self, key: &GroupKey, tabs: impl IntoIterator<Item = TabRef>) -> usize {
        let mut appended = 0;
        for tab in tabs {
            if self.assign(tab, key.clone()) {
                appended += 1;
            }
        }
        appended
    }

    pub fn group_of(&self, tab: TabRef) -> Option<&GroupKey> {
        self.groups
            .iter()
            .find(|(_, members)| members.contains(&tab))
            .map(|(key, _)| key)
    }

    pub fn contains(&self, tab: TabRef) -> bool {
        self.group_of(tab).is_some()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&[TabRef]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[TabRef])> {
        self.groups.iter().map(|(key, members)| (key, members.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl<'de> Deserialize<'de> for GroupIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<GroupKey, Vec<TabRef>>::deserialize(deserializer)?;
        Ok(Self::from_groups(raw))
    }
}
