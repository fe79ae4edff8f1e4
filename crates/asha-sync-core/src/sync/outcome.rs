//! Operation outcomes returned to the application layer.

use serde::Serialize;

use crate::error::ErrorCategory;
use crate::models::{Record, SyncStatus};
use crate::remote::RemoteError;

/// Why a write was kept local instead of being confirmed remotely.
///
/// None of these lose data: the record is persisted and pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Degraded {
    /// No connectivity; queued for the next pass.
    Offline,
    /// Timeout, 5xx or unreadable response; retried on the next pass.
    Transient(String),
    /// The server refused the write. The message is the server's.
    Rejected(String),
    /// The parent patient has no server id yet.
    AwaitingParent,
    /// The record was edited again while the upload was in flight.
    Superseded,
    /// The create succeeded but its response could not be bound.
    Reconciliation(String),
}

impl Degraded {
    pub(crate) fn from_remote(error: &RemoteError) -> Self {
        match error.category() {
            ErrorCategory::Connectivity => Degraded::Offline,
            ErrorCategory::RemoteRejection => Degraded::Rejected(
                error
                    .server_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
            ErrorCategory::TransientServer => Degraded::Transient(error.to_string()),
        }
    }

    /// Stable short name, matching the serialized tag.
    pub fn reason(&self) -> &'static str {
        match self {
            Degraded::Offline => "offline",
            Degraded::Transient(_) => "transient",
            Degraded::Rejected(_) => "rejected",
            Degraded::AwaitingParent => "awaiting_parent",
            Degraded::Superseded => "superseded",
            Degraded::Reconciliation(_) => "reconciliation",
        }
    }

    /// Text for the caller to show, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Degraded::Rejected(message) => Some(message),
            _ => None,
        }
    }
}

/// Result of `save`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// The record as now stored, with both ids
    pub record: Record,
    pub sync_status: SyncStatus,
    /// Set when the write was not confirmed remotely
    pub degraded: Option<Degraded>,
}

impl SaveOutcome {
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}

/// Remote half of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDelete {
    /// The server confirmed (or never had) the row.
    Confirmed,
    /// Owed; a tombstone will retry it.
    Deferred(String),
    /// The record never reached the server.
    NotNeeded,
}

/// Result of `delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// False if there was no such local record
    pub removed: bool,
    pub remote: RemoteDelete,
    /// Child records removed along with a deleted patient
    pub children_removed: u32,
}

/// Result of `fetch_list`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    /// Served from the local mirror without a successful remote read
    pub stale: bool,
    pub inserted: u32,
    pub updated: u32,
    /// Rows left alone: locally dirty, tombstoned or undecodable
    pub skipped: u32,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub(crate) fn local(records: Vec<Record>, stale: bool, error: Option<String>) -> Self {
        Self {
            records,
            stale,
            error,
            ..Self::default()
        }
    }
}

/// Summary of one `force_sync` pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    pub pass_id: Option<String>,
    pub succeeded: u32,
    pub failed: u32,
    /// Left pending on purpose: awaiting a parent or superseded by a newer edit
    pub deferred: u32,
    /// Not attempted because connectivity was lost
    pub skipped: u32,
    pub deletes_confirmed: u32,
    pub deletes_failed: u32,
    pub offline: bool,
    /// Another pass was already running; nothing was done
    pub already_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_from_remote() {
        assert_eq!(
            Degraded::from_remote(&RemoteError::NoConnection("refused".into())),
            Degraded::Offline
        );
        let rejected = Degraded::from_remote(&RemoteError::Http4xx {
            status: 422,
            message: "Phone already registered".into(),
        });
        assert_eq!(rejected.message(), Some("Phone already registered"));
        assert!(matches!(
            Degraded::from_remote(&RemoteError::Timeout),
            Degraded::Transient(_)
        ));
    }

    #[test]
    fn test_report_serializes() {
        let report = SyncReport {
            succeeded: 2,
            ..SyncReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        let degraded = serde_json::to_value(Degraded::AwaitingParent).unwrap();
        assert_eq!(degraded["reason"], Degraded::AwaitingParent.reason());
        assert_eq!(value["succeeded"], 2);
        assert_eq!(value["already_running"], false);
    }
}
