//! Tab lifecycle engine.
//!
//! [`TabKeeper`] owns all mutable state (group index, suspension bookkeeping,
//! recent tabs, cached settings) and reacts to [`HostEvent`]s one at a time.
//! Collaborators are injected at [`TabKeeper::init`]; there is no global state.

mod config;
mod error;
mod event;
mod keeper;
mod messages;
mod runtime;
#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use error::EngineError;
pub use event::{Flow, HostEvent, IdleState};
pub use keeper::TabKeeper;
