use serde_json::{json, Value};
use storage::{RestoreReport, SessionSnapshot};
use sync::ImportPayload;
use tabs::{TabRef, WindowRef};
use tracing::{debug, warn};
use ui::{UiRequest, UiResponse};

use crate::error::EngineError;
use crate::keeper::TabKeeper;

impl TabKeeper {
    /// Decodes and answers a raw UI message.
    pub async fn handle_message(&mut self, message: &Value) -> UiResponse {
        match UiRequest::parse(message) {
            Ok(request) => self.handle_request(request).await,
            Err(error) => {
                warn!(%error, "rejecting ui message");
                UiResponse::failure(error)
            }
        }
    }

    pub async fn handle_request(&mut self, request: UiRequest) -> UiResponse {
        debug!(?request, "ui request");
        let result = match request {
            UiRequest::ExportTabs => self.export_tabs().await,
            UiRequest::ImportTabs { data } => self.import_tabs(&data).await,
            UiRequest::SaveSession => self.save_session().await,
            UiRequest::RestoreSession => self.restore_session().await,
            UiRequest::SwitchTab { tab_id, window_id } => {
                self.switch_tab(tab_id, window_id).await
            }
            UiRequest::ClearRecentTabs => self.clear_recent_tabs().await,
        };
        match result {
            Ok(Value::Null) => UiResponse::ok(),
            Ok(data) => UiResponse::with_data(data),
            Err(error) => {
                warn!(%error, "ui request failed");
                UiResponse::failure(error)
            }
        }
    }

    async fn export_tabs(&mut self) -> Result<Value, EngineError> {
        let timestamp = self.clock.now_millis();
        let (payload, stale) =
            sync::export(&self.groups, self.directory.as_ref(), timestamp).await?;
        self.prune_stale(&stale).await;
        Ok(serde_json::to_value(payload)?)
    }

    /// Nothing is touched unless the payload validates.
    async fn import_tabs(&mut self, data: &Value) -> Result<Value, EngineError> {
        let payload = ImportPayload::parse(data)?;
        let report = sync::import(&payload, &mut self.groups, self.directory.as_ref()).await?;
        if !report.created.is_empty() {
            self.groups_changed().await;
        }
        Ok(serde_json::to_value(report)?)
    }

    async fn save_session(&mut self) -> Result<Value, EngineError> {
        let snapshot = self.sessions.capture(&self.groups).await?;
        Ok(json!({
            "tabs": snapshot.len(),
            "capturedAt": snapshot.captured_at,
        }))
    }

    async fn restore_session(&mut self) -> Result<Value, EngineError> {
        let snapshot: SessionSnapshot = self
            .sessions
            .load()
            .await?
            .ok_or(EngineError::NoSavedSession)?;
        let RestoreReport { restored, failed } = self.restore_snapshot(&snapshot).await;
        let failed: Vec<&str> = failed.iter().map(|failure| failure.url.as_str()).collect();
        Ok(json!({
            "restored": restored.len(),
            "failed": failed,
        }))
    }

    async fn switch_tab(&mut self, tab: TabRef, window: WindowRef) -> Result<Value, EngineError> {
        if let Err(error) = self.directory.activate_tab(tab).await {
            if error.is_not_found() {
                self.prune_tab(tab).await;
            }
            return Err(error.into());
        }
        self.directory.focus_window(window).await?;
        Ok(Value::Null)
    }

    async fn clear_recent_tabs(&mut self) -> Result<Value, EngineError> {
        self.recent.clear();
        self.persist_recent().await;
        Ok(Value::Null)
    }
}
