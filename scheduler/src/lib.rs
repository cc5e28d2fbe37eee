use std::collections::VecDeque;
use std::time::Duration;

use tabs::{TabRef, TabSnapshot};
use tokio::time::Instant;
use tracing::debug;

mod timer;

pub use timer::{TimerArena, TimerHandle};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SUSPENDED: usize = 50;

/// URL schemes that belong to the browser itself.
pub const RESERVED_SCHEMES: &[&str] = &[
    "about",
    "brave",
    "chrome",
    "chrome-extension",
    "devtools",
    "edge",
    "moz-extension",
    "view-source",
];

/// Suspension lifecycle of a single tab.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SuspendState {
    /// Not scheduled. Every tab starts here.
    Active,
    /// Idle timer armed; discards when it fires.
    Pending,
    /// Discarded by us and still tracked for capacity accounting.
    Discarded,
}

impl Default for SuspendState {
    fn default() -> Self {
        Self::Active
    }
}

/// Tunables for the scheduler.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SuspensionPolicy {
    pub idle_timeout: Duration,
    /// Upper bound on the discarded bookkeeping set.
    pub max_suspended: usize,
}

impl Default for SuspensionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_suspended: DEFAULT_MAX_SUSPENDED,
        }
    }
}

/// Decides which tabs must never leave `Active`.
pub trait ProtectionPolicy: Send + Sync {
    fn is_protected(&self, tab: &TabSnapshot) -> bool;
}

/// Protects pinned tabs, tabs playing audio and browser-internal pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProtection;

impl ProtectionPolicy for DefaultProtection {
    fn is_protected(&self, tab: &TabSnapshot) -> bool {
        tab.pinned || tab.audible || tab.url.as_deref().is_some_and(uses_reserved_scheme)
    }
}

/// Returns `true` if `url` starts with one of [`RESERVED_SCHEMES`].
pub fn uses_reserved_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    RESERVED_SCHEMES
        .iter()
        .any(|reserved| scheme.eq_ignore_ascii_case(reserved))
}

/// Idle suspension state machine.
///
/// `Active -> Pending` on a system idle signal, `Pending -> Discarded` once the
/// owner reports a successful discard of a due timer, and back to `Active` on
/// activation. A tab is never both pending and discarded.
pub struct SuspensionScheduler {
    policy: SuspensionPolicy,
    protection: Box<dyn ProtectionPolicy>,
    timers: TimerArena,
    /// Oldest discard first.
    discarded: VecDeque<TabRef>,
}

impl SuspensionScheduler {
    pub fn new(policy: SuspensionPolicy) -> Self {
        Self::with_protection(policy, DefaultProtection)
    }

    pub fn with_protection<P: ProtectionPolicy + 'static>(
        policy: SuspensionPolicy,
        protection: P,
    ) -> Self {
        Self {
            policy,
            protection: Box::new(protection),
            timers: TimerArena::new(),
            discarded: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> SuspensionPolicy {
        self.policy
    }

    /// Replaces the policy. Armed timers keep their deadlines; a smaller
    /// capacity trims the discarded set immediately. Returns the trimmed tabs.
    pub fn set_policy(&mut self, policy: SuspensionPolicy) -> Vec<TabRef> {
        self.policy = policy;
        self.enforce_capacity()
    }

    pub fn state(&self, tab: TabRef) -> SuspendState {
        if self.timers.is_armed(tab) {
            SuspendState::Pending
        } else if self.discarded.contains(&tab) {
            SuspendState::Discarded
        } else {
            SuspendState::Active
        }
    }

    pub fn is_protected(&self, tab: &TabSnapshot) -> bool {
        self.protection.is_protected(tab)
    }

    /// Handles a system idle signal. `inactive` is the host's current list of
    /// background tabs. Returns the tabs that entered `Pending`.
    pub fn on_idle(&mut self, now: Instant, inactive: &[TabSnapshot]) -> Vec<TabRef> {
        let deadline = now + self.policy.idle_timeout;
        let mut armed = Vec::new();
        for tab in inactive {
            if tab.active || tab.discarded || self.is_protected(tab) {
                continue;
            }
            if self.state(tab.id) != SuspendState::Active {
                continue;
            }
            self.timers.arm(tab.id, deadline);
            armed.push(tab.id);
        }
        if !armed.is_empty() {
            debug!(count = armed.len(), timeout = ?self.policy.idle_timeout, "armed suspension timers");
        }
        armed
    }

    /// Handles a system active signal: every pending tab returns to `Active`.
    /// Discarded tabs are left alone.
    pub fn on_active(&mut self) -> Vec<TabRef> {
        let cancelled: Vec<TabRef> = self
            .timers
            .cancel_all()
            .into_iter()
            .map(|handle| handle.tab)
            .collect();
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelled suspension timers");
        }
        cancelled
    }

    /// Handles activation of a single tab. Returns its previous state.
    pub fn on_activated(&mut self, tab: TabRef) -> SuspendState {
        self.reset(tab)
    }

    /// Cancels a pending timer, e.g. because the tab became protected.
    /// Discarded tabs are unaffected. Returns `true` if a timer was armed.
    pub fn cancel(&mut self, tab: TabRef) -> bool {
        self.timers.cancel(tab).is_some()
    }

    /// Drops all bookkeeping for a closed tab. Returns its previous state.
    pub fn forget(&mut self, tab: TabRef) -> SuspendState {
        self.reset(tab)
    }

    fn reset(&mut self, tab: TabRef) -> SuspendState {
        let previous = self.state(tab);
        match previous {
            SuspendState::Pending => {
                self.timers.cancel(tab);
            }
            SuspendState::Discarded => self.discarded.retain(|entry| *entry != tab),
            SuspendState::Active => {}
        }
        previous
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Consumes every timer due at `now`. The returned tabs are back in
    /// `Active` until the owner confirms the discard with [`mark_discarded`].
    ///
    /// [`mark_discarded`]: Self::mark_discarded
    pub fn take_due(&mut self, now: Instant) -> Vec<TabRef> {
        self.timers
            .take_due(now)
            .into_iter()
            .map(|handle| handle.tab)
            .collect()
    }

    /// Records a completed discard and applies the capacity bound. Returns the
    /// tabs dropped from bookkeeping, oldest first. Dropping a tab here does
    /// not reload it.
    pub fn mark_discarded(&mut self, tab: TabRef) -> Vec<TabRef> {
        self.timers.cancel(tab);
        self.discarded.retain(|entry| *entry != tab);
        self.discarded.push_back(tab);
        self.enforce_capacity()
    }

    /// Seeds the discarded set from persisted state, oldest first.
    pub fn restore_discarded(&mut self, tabs: impl IntoIterator<Item = TabRef>) -> Vec<TabRef> {
        for tab in tabs {
            if !self.discarded.contains(&tab) && !self.timers.is_armed(tab) {
                self.discarded.push_back(tab);
            }
        }
        self.enforce_capacity()
    }

    fn enforce_capacity(&mut self) -> Vec<TabRef> {
        let mut dropped = Vec::new();
        while self.discarded.len() > self.policy.max_suspended {
            if let Some(oldest) = self.discarded.pop_front() {
                dropped.push(oldest);
            }
        }
        if !dropped.is_empty() {
            debug!(count = dropped.len(), limit = self.policy.max_suspended, "dropped discarded tabs from bookkeeping");
        }
        dropped
    }

    /// Discarded tabs, oldest first.
    pub fn discarded(&self) -> impl Iterator<Item = TabRef> + '_ {
        self.discarded.iter().copied()
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    #[cfg(feature = "diagnostics")]
    pub fn timer(&self, tab: TabRef) -> Option<TimerHandle> {
        self.timers.get(tab).copied()
    }
}

impl Default for SuspensionScheduler {
    fn default() -> Self {
        Self::new(SuspensionPolicy::default())
    }
}
