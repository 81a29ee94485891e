use serde::Serialize;

use crate::error::{ControllerError, ReloadError};
use crate::reload::ReloadReport;
use crate::resource::{Category, ResourceKey};

/// Why an event caused no change at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IgnoreReason {
    /// The resource targets another instance.
    NotOwned,
    /// Re-delivery of a state that was already applied.
    Unchanged,
    /// No rule/job/config flag is set.
    UnknownCategory,
}

#[derive(Debug)]
pub enum ReloadStatus {
    Reloaded(ReloadReport),
    Failed(ReloadError),
}

impl ReloadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadStatus::Reloaded(_))
    }
}

/// What one create/update/delete event did.
#[derive(Debug)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    /// Artifacts changed and a reload was attempted.
    Applied {
        category: Category,
        reload: ReloadStatus,
    },
    /// A job update was invalid; the previous fragments were restored and
    /// the configuration reloaded.
    RolledBack {
        diagnostics: Vec<String>,
        reload: ReloadStatus,
    },
    /// The event was aborted before any reload.
    Rejected(ControllerError),
}

impl EventOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, EventOutcome::Ignored(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, EventOutcome::Rejected(_))
    }

    /// The reload attempt of this event, if one was made.
    pub fn reload(&self) -> Option<&ReloadStatus> {
        match self {
            EventOutcome::Applied { reload, .. } | EventOutcome::RolledBack { reload, .. } => {
                Some(reload)
            }
            _ => None,
        }
    }
}

/// Dry-run verdict for one resource, produced without touching the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub resource: ResourceKey,
    pub category: Category,
    pub owned: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}
