use storage::StorageChange;
use tabs::{TabChange, TabRef};
use tokio::sync::oneshot;
use ui::{UiRequest, UiResponse};

/// System-wide user presence reported by the host.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Notifications delivered by the host, in occurrence order per tab.
#[derive(Debug)]
pub enum HostEvent {
    TabChanged { tab: TabRef, change: TabChange },
    TabRemoved(TabRef),
    TabActivated(TabRef),
    IdleStateChanged(IdleState),
    StorageChanged(StorageChange),
    Message {
        request: UiRequest,
        reply: Option<oneshot::Sender<UiResponse>>,
    },
    Shutdown,
}

/// Whether the event loop keeps going after an event.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Shutdown,
}
