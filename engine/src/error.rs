use storage::{PersistenceError, SessionError};
use sync::ImportError;
use tabs::DirectoryError;
use thiserror::Error;

/// Failures reported across the messaging boundary. Everything else is
/// logged and absorbed by the handlers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("could not encode response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no saved session")]
    NoSavedSession,
}
