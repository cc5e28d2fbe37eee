use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use util::IdGenerator;

use crate::{
    CreateTab, DirectoryError, ResourceDirectory, TabQuery, TabRef, TabSnapshot, WindowRef,
};

const DEFAULT_WINDOW: WindowRef = WindowRef(1);

/// In-process tab directory.
///
/// Stands in for the host browser in tests and headless runs. Mutators that a
/// real user would trigger (`open`, `close`, `navigate`, ...) do not emit
/// events; callers forward the matching host event themselves.
#[derive(Debug, Default)]
pub struct MemoryBrowser {
    inner: Mutex<BrowserState>,
}

#[derive(Debug, Default)]
struct BrowserState {
    tabs: Vec<TabSnapshot>,
    ids: IdGenerator,
    focused: Option<WindowRef>,
    failing_urls: HashSet<String>,
    discards: Vec<TabRef>,
}

impl BrowserState {
    fn find_mut(&mut self, tab: TabRef) -> Result<&mut TabSnapshot, DirectoryError> {
        self.tabs
            .iter_mut()
            .find(|entry| entry.id == tab)
            .ok_or(DirectoryError::NotFound(tab))
    }

    fn insert(&mut self, request: CreateTab) -> TabSnapshot {
        if request.active {
            for tab in &mut self.tabs {
                if tab.window_id == DEFAULT_WINDOW {
                    tab.active = false;
                }
            }
        }

        let entry = TabSnapshot {
            id: TabRef::new(self.ids.next()),
            window_id: DEFAULT_WINDOW,
            title: request.url.clone(),
            url: Some(request.url),
            pinned: request.pinned,
            audible: false,
            active: request.active,
            discarded: false,
        };
        self.tabs.push(entry.clone());
        entry
    }
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a background tab and returns its id.
    pub fn open(&self, url: &str) -> TabRef {
        self.inner.lock().insert(CreateTab::background(url)).id
    }

    /// Opens a tab with explicit flags.
    pub fn open_with(&self, request: CreateTab) -> TabSnapshot {
        self.inner.lock().insert(request)
    }

    /// Closes a tab. Returns `false` if it was already gone.
    pub fn close(&self, tab: TabRef) -> bool {
        let mut state = self.inner.lock();
        let before = state.tabs.len();
        state.tabs.retain(|entry| entry.id != tab);
        state.tabs.len() != before
    }

    pub fn navigate(&self, tab: TabRef, url: &str) -> bool {
        let mut state = self.inner.lock();
        let Ok(entry) = state.find_mut(tab) else {
            return false;
        };
        entry.url = Some(url.to_string());
        entry.title = url.to_string();
        true
    }

    pub fn set_pinned(&self, tab: TabRef, pinned: bool) -> bool {
        let mut state = self.inner.lock();
        let Ok(entry) = state.find_mut(tab) else {
            return false;
        };
        entry.pinned = pinned;
        true
    }

    pub fn set_audible(&self, tab: TabRef, audible: bool) -> bool {
        let mut state = self.inner.lock();
        let Ok(entry) = state.find_mut(tab) else {
            return false;
        };
        entry.audible = audible;
        true
    }

    /// Makes `create_tab` fail for this exact URL.
    pub fn fail_creation_of(&self, url: &str) {
        self.inner.lock().failing_urls.insert(url.to_string());
    }

    pub fn snapshot(&self, tab: TabRef) -> Option<TabSnapshot> {
        self.inner.lock().tabs.iter().find(|entry| entry.id == tab).cloned()
    }

    pub fn tabs(&self) -> Vec<TabSnapshot> {
        self.inner.lock().tabs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tabs.is_empty()
    }

    /// Every successful discard call, in call order.
    pub fn discards(&self) -> Vec<TabRef> {
        self.inner.lock().discards.clone()
    }

    pub fn focused_window(&self) -> Option<WindowRef> {
        self.inner.lock().focused
    }
}

#[async_trait]
impl ResourceDirectory for MemoryBrowser {
    async fn list_tabs(&self, query: TabQuery) -> Result<Vec<TabSnapshot>, DirectoryError> {
        let state = self.inner.lock();
        Ok(state
            .tabs
            .iter()
            .filter(|tab| query.matches(tab))
            .cloned()
            .collect())
    }

    async fn get_tab(&self, tab: TabRef) -> Result<TabSnapshot, DirectoryError> {
        self.snapshot(tab).ok_or(DirectoryError::NotFound(tab))
    }

    async fn create_tab(&self, request: CreateTab) -> Result<TabSnapshot, DirectoryError> {
        let mut state = self.inner.lock();
        if state.failing_urls.contains(&request.url) {
            return Err(DirectoryError::Host(format!(
                "could not open {}",
                request.url
            )));
        }
        Ok(state.insert(request))
    }

    async fn discard_tab(&self, tab: TabRef) -> Result<(), DirectoryError> {
        let mut state = self.inner.lock();
        let entry = state.find_mut(tab)?;
        if entry.active {
            return Err(DirectoryError::Host(format!(
                "tab {tab} is active and cannot be discarded"
            )));
        }
        entry.discarded = true;
        state.discards.push(tab);
        Ok(())
    }

    async fn activate_tab(&self, tab: TabRef) -> Result<(), DirectoryError> {
        let mut state = self.inner.lock();
        let window = state.find_mut(tab)?.window_id;
        for entry in &mut state.tabs {
            if entry.window_id != window {
                continue;
            }
            entry.active = entry.id == tab;
            if entry.active {
                // Activating a discarded tab reloads it.
                entry.discarded = false;
            }
        }
        Ok(())
    }

    async fn focus_window(&self, window: WindowRef) -> Result<(), DirectoryError> {
        let mut state = self.inner.lock();
        if !state.tabs.iter().any(|tab| tab.window_id == window) {
            return Err(DirectoryError::Host(format!("window {window} not found")));
        }
        state.focused = Some(window);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_query_tabs() {
        let browser = MemoryBrowser::new();
        let first = browser.open("https://a.com/1");
        let second = browser
            .create_tab(CreateTab {
                url: "https://b.com".into(),
                pinned: true,
                active: true,
            })
            .await
            .unwrap();

        assert_eq!(first, TabRef::new(1));
        assert_eq!(second.id, TabRef::new(2));
        assert!(second.pinned);

        let inactive = browser.list_tabs(TabQuery::inactive()).await.unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].id, first);
    }

    #[tokio::test]
    async fn closed_tabs_report_not_found() {
        let browser = MemoryBrowser::new();
        let tab = browser.open("https://a.com");
        assert!(browser.close(tab));
        assert!(!browser.close(tab));

        assert_eq!(browser.get_tab(tab).await, Err(DirectoryError::NotFound(tab)));
        assert_eq!(browser.discard_tab(tab).await, Err(DirectoryError::NotFound(tab)));
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let browser = MemoryBrowser::new();
        let tab = browser.open("https://a.com");
        browser.close(tab);
        let next = browser.open("https://a.com");
        assert_ne!(tab, next);
    }

    #[tokio::test]
    async fn activation_reloads_discarded_tab() {
        let browser = MemoryBrowser::new();
        let tab = browser.open("https://a.com");
        browser.discard_tab(tab).await.unwrap();
        assert!(browser.snapshot(tab).unwrap().discarded);

        browser.activate_tab(tab).await.unwrap();
        let snapshot = browser.snapshot(tab).unwrap();
        assert!(snapshot.active);
        assert!(!snapshot.discarded);
        assert_eq!(browser.discards(), vec![tab]);
    }

    #[tokio::test]
    async fn failing_urls_reject_creation() {
        let browser = MemoryBrowser::new();
        browser.fail_creation_of("https://broken.test");
        let result = browser
            .create_tab(CreateTab::background("https://broken.test"))
            .await;
        assert!(matches!(result, Err(DirectoryError::Host(_))));
        assert!(browser.is_empty());
    }
}
