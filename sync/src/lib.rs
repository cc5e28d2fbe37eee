//! Cross-device reconciliation of the group index, plus file export/import.
//!
//! Both features share one representation: the group index together with the
//! URLs of its tabs, keyed by domain. Tab ids only mean something on the
//! device that issued them, so URLs are what actually travel.

mod payload;
mod reconciler;
mod transfer;

pub use payload::{collect_local, LocalView, SyncPayload, UrlMap};
pub use reconciler::{MergeReport, PushOutcome, SyncError, SyncReconciler};
pub use transfer::{export, import, ExportPayload, ImportError, ImportPayload, ImportReport};
