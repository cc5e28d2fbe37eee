use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabs::{TabRef, WindowRef};
use thiserror::Error;

/// Request sent by the popup UI, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiRequest {
    ExportTabs,
    /// `data` is the raw contents of an export file. It is validated by the
    /// importer, not here, so a bad file yields an import error rather than a
    /// message error.
    ImportTabs { data: Value },
    SaveSession,
    RestoreSession,
    #[serde(rename_all = "camelCase")]
    SwitchTab { tab_id: TabRef, window_id: WindowRef },
    ClearRecentTabs,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

impl UiRequest {
    pub fn parse(message: &Value) -> Result<Self, MessageError> {
        Self::deserialize(message).map_err(|err| MessageError::Unrecognized(err.to_string()))
    }
}

/// Reply to a [`UiRequest`]: `{success, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}
