use std::collections::HashMap;

use tabs::TabRef;
use tokio::time::Instant;

/// An armed suspension timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub tab: TabRef,
    /// Arm order; breaks ties between equal deadlines.
    pub generation: u64,
    pub deadline: Instant,
}

/// Per-tab timers, at most one per tab.
///
/// Nothing fires on its own: the owner polls `next_deadline` and drains
/// expired timers with `take_due`. Cancellation is always explicit.
#[derive(Debug, Default)]
pub struct TimerArena {
    slots: HashMap<TabRef, TimerHandle>,
    generation: u64,
}

impl TimerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer for `tab`, replacing any timer already armed for it.
    /// Returns the new handle and the replaced one.
    pub fn arm(&mut self, tab: TabRef, deadline: Instant) -> (TimerHandle, Option<TimerHandle>) {
        self.generation += 1;
        let handle = TimerHandle {
            tab,
            generation: self.generation,
            deadline,
        };
        let replaced = self.slots.insert(tab, handle);
        (handle, replaced)
    }

    pub fn cancel(&mut self, tab: TabRef) -> Option<TimerHandle> {
        self.slots.remove(&tab)
    }

    /// Cancels every timer, returning them in arm order.
    pub fn cancel_all(&mut self) -> Vec<TimerHandle> {
        let mut cancelled: Vec<TimerHandle> = self.slots.drain().map(|(_, handle)| handle).collect();
        cancelled.sort_by_key(|handle| handle.generation);
        cancelled
    }

    pub fn is_armed(&self, tab: TabRef) -> bool {
        self.slots.contains_key(&tab)
    }

    pub fn get(&self, tab: TabRef) -> Option<&TimerHandle> {
        self.slots.get(&tab)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|handle| handle.deadline).min()
    }

    /// Removes and returns every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerHandle> {
        let mut due: Vec<TimerHandle> = self
            .slots
            .values()
            .filter(|handle| handle.deadline <= now)
            .copied()
            .collect();
        due.sort_by_key(|handle| (handle.deadline, handle.generation));
        for handle in &due {
            self.slots.remove(&handle.tab);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
