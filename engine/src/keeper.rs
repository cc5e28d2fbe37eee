use std::collections::HashSet;
use std::sync::Arc;

use groups::GroupIndex;
use scheduler::{SuspendState, SuspensionPolicy, SuspensionScheduler};
use storage::{
    encode_into, keys, load, Items, PersistenceGateway, RecentTabs, RestoreReport, SessionSnapshot,
    SessionStore, Settings, StorageArea, StorageChange,
};
use sync::SyncReconciler;
use tabs::{DirectoryError, GroupKey, ResourceDirectory, TabChange, TabQuery, TabRef};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use util::Clock;

use crate::config::EngineConfig;
use crate::event::{Flow, HostEvent, IdleState};

/// Which persisted keys failed their last write and must be retried.
#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    groups: bool,
    suspended: bool,
    recent: bool,
}

/// The engine's context object. One instance per process.
pub struct TabKeeper {
    pub(crate) directory: Arc<dyn ResourceDirectory>,
    pub(crate) gateway: Arc<dyn PersistenceGateway>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    settings: Settings,
    pub(crate) groups: GroupIndex,
    pub(crate) scheduler: SuspensionScheduler,
    pub(crate) sessions: SessionStore,
    sync: SyncReconciler,
    pub(crate) recent: RecentTabs,
    dirty: Dirty,
}

fn suspension_policy(settings: &Settings) -> SuspensionPolicy {
    SuspensionPolicy {
        idle_timeout: settings.idle_timeout(),
        max_suspended: settings.max_suspended,
    }
}

impl TabKeeper {
    /// Loads persisted state, reconciles it with the tabs currently open, and
    /// restores the saved session if configured to.
    ///
    /// Never fails: any unreadable piece of state falls back to its default.
    pub async fn init(
        directory: Arc<dyn ResourceDirectory>,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let settings: Settings = load_or_default(gateway.as_ref(), keys::SETTINGS).await;
        let groups: GroupIndex = load_or_default(gateway.as_ref(), keys::TAB_GROUPS).await;
        let suspended: Vec<TabRef> = load_or_default(gateway.as_ref(), keys::SUSPENDED_TABS).await;
        let recent: RecentTabs = load_or_default(gateway.as_ref(), keys::RECENT_TABS).await;

        let mut scheduler = SuspensionScheduler::new(suspension_policy(&settings));
        scheduler.restore_discarded(suspended);

        let mut keeper = Self {
            sessions: SessionStore::new(directory.clone(), gateway.clone(), clock.clone()),
            sync: SyncReconciler::new(directory.clone(), gateway.clone(), clock.clone()),
            directory,
            gateway,
            clock,
            config,
            settings,
            groups,
            scheduler,
            recent,
            dirty: Dirty::default(),
        };

        keeper.bootstrap().await;
        if keeper.config.restore_on_startup {
            match keeper.sessions.load().await {
                Ok(Some(snapshot)) if !snapshot.is_empty() => {
                    keeper.restore_snapshot(&snapshot).await;
                }
                Ok(_) => debug!("no saved session to restore"),
                Err(error) => warn!(%error, "could not read saved session"),
            }
        }
        info!(
            groups = keeper.groups.len(),
            suspended = keeper.scheduler.discarded().count(),
            "tab keeper ready"
        );
        keeper
    }

    /// Drops references to tabs that no longer exist and files open tabs that
    /// are not grouped yet.
    async fn bootstrap(&mut self) {
        let open = match self.directory.list_tabs(TabQuery::all()).await {
            Ok(open) => open,
            Err(error) => {
                warn!(%error, "could not list tabs; keeping persisted state as is");
                return;
            }
        };

        let valid: HashSet<TabRef> = open.iter().map(|tab| tab.id).collect();
        let pruned = self.groups.prune(&valid);

        let gone: Vec<TabRef> = self
            .scheduler
            .discarded()
            .filter(|tab| !valid.contains(tab))
            .collect();
        for tab in &gone {
            self.scheduler.forget(*tab);
        }
        let closed_recent: Vec<TabRef> = self
            .recent
            .iter()
            .map(|entry| entry.id)
            .filter(|tab| !valid.contains(tab))
            .collect();
        for tab in &closed_recent {
            self.recent.remove(*tab);
        }

        let mut grouped = 0;
        if self.settings.auto_group {
            for tab in &open {
                if self.groups.contains(tab.id) {
                    continue;
                }
                if let Some(key) = tab.group_key() {
                    self.groups.assign(tab.id, key);
                    grouped += 1;
                }
            }
        }

        debug!(pruned = pruned.len(), grouped, "bootstrapped group index");
        if !pruned.is_empty() || grouped > 0 {
            self.persist_groups().await;
        }
        if !gone.is_empty() {
            self.persist_suspended().await;
        }
        if !closed_recent.is_empty() {
            self.persist_recent().await;
        }
    }

    pub fn groups(&self) -> &GroupIndex {
        &self.groups
    }

    pub fn scheduler(&self) -> &SuspensionScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn recent(&self) -> &RecentTabs {
        &self.recent
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Applies one host event. Returns [`Flow::Shutdown`] when the host asked
    /// the engine to stop.
    pub async fn handle_event(&mut self, event: HostEvent) -> Flow {
        match event {
            HostEvent::TabChanged { tab, change } => self.on_tab_changed(tab, change).await,
            HostEvent::TabRemoved(tab) => self.on_tab_removed(tab).await,
            HostEvent::TabActivated(tab) => self.on_tab_activated(tab).await,
            HostEvent::IdleStateChanged(state) => self.on_idle_state(state).await,
            HostEvent::StorageChanged(change) => self.on_storage_changed(change).await,
            HostEvent::Message { request, reply } => {
                let response = self.handle_request(request).await;
                if let Some(reply) = reply {
                    if reply.send(response).is_err() {
                        debug!("message sender went away before the reply");
                    }
                }
            }
            HostEvent::Shutdown => return Flow::Shutdown,
        }
        Flow::Continue
    }

    async fn on_tab_changed(&mut self, tab: TabRef, change: TabChange) {
        if change.pinned == Some(true) || change.audible == Some(true) {
            if self.scheduler.cancel(tab) {
                debug!(tab = %tab, "tab became protected; cancelled suspension");
            }
        }

        let Some(url) = change.url else {
            return;
        };
        if !self.settings.auto_group {
            return;
        }
        let changed = match GroupKey::from_url(&url) {
            Some(key) => {
                debug!(tab = %tab, domain = %key, "grouping tab");
                self.groups.assign(tab, key)
            }
            None => self.groups.remove(tab).is_some(),
        };
        if changed {
            self.groups_changed().await;
        }
    }

    async fn on_tab_removed(&mut self, tab: TabRef) {
        self.prune_tab(tab).await;
    }

    async fn on_tab_activated(&mut self, tab: TabRef) {
        if self.scheduler.on_activated(tab) == SuspendState::Discarded {
            self.persist_suspended().await;
        }

        match self.directory.get_tab(tab).await {
            Ok(snapshot) => {
                self.recent.touch(snapshot, self.config.recent_limit);
                self.persist_recent().await;
            }
            Err(DirectoryError::NotFound(_)) => self.prune_tab(tab).await,
            Err(error) => warn!(tab = %tab, %error, "could not read activated tab"),
        }
    }

    async fn on_idle_state(&mut self, state: IdleState) {
        match state {
            IdleState::Idle => {
                if !self.settings.auto_suspend {
                    return;
                }
                match self.directory.list_tabs(TabQuery::inactive()).await {
                    Ok(inactive) => {
                        self.scheduler.on_idle(Instant::now(), &inactive);
                    }
                    Err(error) => warn!(%error, "could not list inactive tabs"),
                }
            }
            IdleState::Active => {
                self.scheduler.on_active();
            }
            IdleState::Locked => debug!("screen locked; suspension unchanged"),
        }
    }

    async fn on_storage_changed(&mut self, change: StorageChange) {
        match change.area {
            StorageArea::Local if change.touches(keys::SETTINGS) => self.reload_settings().await,
            StorageArea::Synced
                if change.touches(keys::TAB_GROUPS) || change.touches(keys::URLS) =>
            {
                self.sync_cycle().await;
            }
            _ => {}
        }
    }

    async fn reload_settings(&mut self) {
        let loaded = load::<Settings>(self.gateway.as_ref(), StorageArea::Local, keys::SETTINGS);
        let settings = match loaded.await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(error) => {
                warn!(%error, "could not reload settings; keeping current ones");
                return;
            }
        };
        if settings == self.settings {
            return;
        }

        let sync_turned_on = settings.sync_enabled && !self.settings.sync_enabled;
        let suspend_turned_off = !settings.auto_suspend && self.settings.auto_suspend;
        self.settings = settings;
        if suspend_turned_off {
            let cancelled = self.scheduler.on_active();
            debug!(count = cancelled.len(), "auto suspend disabled; cancelled timers");
        }
        let trimmed = self.scheduler.set_policy(suspension_policy(&self.settings));
        if !trimmed.is_empty() {
            self.persist_suspended().await;
        }
        info!(settings = ?self.settings, "settings reloaded");

        if sync_turned_on {
            self.sync_cycle().await;
        }
    }

    /// Discards every tab whose idle timer is due at `now`.
    pub async fn fire_due_timers(&mut self, now: Instant) {
        let due = self.scheduler.take_due(now);
        if !self.settings.auto_suspend {
            if !due.is_empty() {
                debug!(count = due.len(), "auto suspend disabled; dropping due timers");
            }
            return;
        }
        for tab in due {
            // The tab may have changed since the timer was armed.
            let snapshot = match self.directory.get_tab(tab).await {
                Ok(snapshot) => snapshot,
                Err(DirectoryError::NotFound(_)) => {
                    self.prune_tab(tab).await;
                    continue;
                }
                Err(error) => {
                    warn!(tab = %tab, %error, "could not read tab before discarding");
                    continue;
                }
            };
            if snapshot.active || self.scheduler.is_protected(&snapshot) {
                debug!(tab = %tab, "tab no longer eligible; not discarding");
                continue;
            }

            match self.directory.discard_tab(tab).await {
                Ok(()) => {
                    let dropped = self.scheduler.mark_discarded(tab);
                    debug!(tab = %tab, dropped = dropped.len(), "discarded idle tab");
                    self.persist_suspended().await;
                }
                Err(DirectoryError::NotFound(_)) => self.prune_tab(tab).await,
                Err(error) => warn!(tab = %tab, %error, "discard failed"),
            }
        }
    }

    /// Removes every trace of a tab that no longer exists.
    pub(crate) async fn prune_tab(&mut self, tab: TabRef) {
        let grouped = self.groups.remove(tab).is_some();
        let discarded = self.scheduler.forget(tab) == SuspendState::Discarded;
        let recent = self.recent.remove(tab);

        if grouped {
            self.groups_changed().await;
        }
        if discarded {
            self.persist_suspended().await;
        }
        if recent {
            self.persist_recent().await;
        }
    }

    pub(crate) async fn prune_stale(&mut self, stale: &[TabRef]) {
        if stale.is_empty() {
            return;
        }
        for tab in stale {
            self.groups.remove(*tab);
        }
        debug!(count = stale.len(), "pruned closed tabs from groups");
        self.persist_groups().await;
    }

    /// Persists the group index and pushes it if sync is on.
    pub(crate) async fn groups_changed(&mut self) {
        self.persist_groups().await;
        self.push().await;
    }

    /// Captures a session snapshot and retries any failed writes.
    pub async fn capture_session(&mut self) -> Option<SessionSnapshot> {
        self.flush_dirty().await;
        match self.sessions.capture(&self.groups).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                warn!(%error, "session capture failed");
                None
            }
        }
    }

    /// Reopens a snapshot and files the new tabs under their saved groups.
    pub(crate) async fn restore_snapshot(&mut self, snapshot: &SessionSnapshot) -> RestoreReport {
        let report = self.sessions.restore(snapshot).await;
        if self.settings.auto_group {
            let mut changed = false;
            for restored in &report.restored {
                let key = restored.group.clone().or_else(|| restored.tab.group_key());
                if let Some(key) = key {
                    changed |= self.groups.assign(restored.tab.id, key);
                }
            }
            if changed {
                self.groups_changed().await;
            }
        }
        report
    }

    /// Pulls and merges remote groups, then pushes the result.
    pub async fn sync_cycle(&mut self) {
        if !self.settings.sync_enabled {
            return;
        }
        match self.sync.pull(&mut self.groups).await {
            Ok(report) if report.changed() => self.persist_groups().await,
            Ok(_) => {}
            Err(error) => warn!(%error, "sync pull failed"),
        }
        self.push().await;
    }

    pub(crate) async fn push(&mut self) {
        if !self.settings.sync_enabled {
            return;
        }
        match self.sync.push(&self.groups).await {
            Ok(outcome) => self.prune_stale(&outcome.stale).await,
            Err(error) => warn!(%error, "sync push failed"),
        }
    }

    /// Final flush before the process goes away.
    pub async fn teardown(mut self) {
        self.capture_session().await;
        self.persist_groups().await;
        self.persist_suspended().await;
        self.persist_recent().await;
        info!("tab keeper stopped");
    }

    async fn flush_dirty(&mut self) {
        let dirty = self.dirty;
        if dirty.groups {
            self.persist_groups().await;
        }
        if dirty.suspended {
            self.persist_suspended().await;
        }
        if dirty.recent {
            self.persist_recent().await;
        }
    }

    pub(crate) async fn persist_groups(&mut self) {
        let ok = write(self.gateway.as_ref(), keys::TAB_GROUPS, &self.groups).await;
        self.dirty.groups = !ok;
    }

    async fn persist_suspended(&mut self) {
        let suspended: Vec<TabRef> = self.scheduler.discarded().collect();
        let ok = write(self.gateway.as_ref(), keys::SUSPENDED_TABS, &suspended).await;
        self.dirty.suspended = !ok;
    }

    pub(crate) async fn persist_recent(&mut self) {
        let ok = write(self.gateway.as_ref(), keys::RECENT_TABS, &self.recent).await;
        self.dirty.recent = !ok;
    }
}

/// Writes one local key. Failures are logged; the in-memory value stays
/// authoritative and the caller retries on its next write.
async fn write<T: serde::Serialize>(gateway: &dyn PersistenceGateway, key: &str, value: &T) -> bool {
    let mut items = Items::new();
    if let Err(error) = encode_into(&mut items, key, value) {
        warn!(key, %error, "could not encode state");
        return false;
    }
    match gateway.set_local(items).await {
        Ok(()) => true,
        Err(error) => {
            warn!(key, %error, "persisting state failed; will retry");
            false
        }
    }
}

async fn load_or_default<T>(gateway: &dyn PersistenceGateway, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match load(gateway, StorageArea::Local, key).await {
        Ok(value) => value.unwrap_or_default(),
        Err(error) => {
            warn!(key, %error, "could not load persisted state; using default");
            T::default()
        }
    }
}
