//! Durable state for Tabkeep.
//!
//! [`PersistenceGateway`] is the only path to storage. The rest of the crate
//! layers typed access on top of it: user [`Settings`], the session
//! snapshot, and the recent-tabs list.

mod file;
mod gateway;
pub mod keys;
mod memory;
mod recent;
mod session;
mod settings;

pub use file::JsonFileGateway;
pub use gateway::{
    encode_into, load, Items, PersistenceError, PersistenceGateway, StorageArea, StorageChange,
};
pub use memory::MemoryGateway;
pub use recent::{RecentTabs, RECENT_TABS_LIMIT};
pub use session::{
    RestoreFailure, RestoreReport, RestoredTab, SessionEntry, SessionError, SessionSnapshot,
    SessionStore,
};
pub use settings::Settings;
