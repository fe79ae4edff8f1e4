//! Identity reconciliation between local ids and server ids.

use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbError};
use crate::models::{EntityKind, LedgerAction, Record, RecordKey, SyncStatus};

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A create succeeded but the response carried no usable id.
    #[error("Create response for {0} carried no server id")]
    MissingServerId(RecordKey),

    /// The record is already bound to a different server id.
    #[error("{key} is bound to server id {bound}, response returned {returned}")]
    ServerIdConflict {
        key: RecordKey,
        bound: i64,
        returned: i64,
    },

    #[error("Database error: {0}")]
    Store(#[from] DbError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Result of binding a create response to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The id was written now.
    Bound,
    /// The record already carried this id; nothing changed.
    AlreadyBound,
    /// The record was deleted locally while the create was in flight.
    Gone,
}

/// Remote verb for a record: update once bound, create otherwise.
pub fn select_action(record: &Record) -> LedgerAction {
    if record.is_bound() {
        LedgerAction::Update
    } else {
        LedgerAction::Create
    }
}

/// The server id from a create response, or a reconciliation error.
pub fn require_server_id(key: RecordKey, id: Option<i64>) -> ReconcileResult<i64> {
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(ReconcileError::MissingServerId(key)),
    }
}

enum Attempt {
    Done(BindOutcome),
    /// Another id already occupies the slot
    Blocked(i64),
}

/// Bind `server_id` to the record at `key`. Idempotent.
///
/// If a list fetch mirrored the same server row while the create was in
/// flight, that synced duplicate is dropped in favour of the local record.
/// Binding a patient also fills in the parent server id on its children.
pub fn bind_server_id(db: &Database, key: RecordKey, server_id: i64) -> ReconcileResult<BindOutcome> {
    let attempt = db.atomically(|db| {
        let Some(record) = db.get_record(key.kind, key.local_id)? else {
            return Ok(Attempt::Done(BindOutcome::Gone));
        };

        match record.server_id {
            Some(bound) if bound == server_id => return Ok(Attempt::Done(BindOutcome::AlreadyBound)),
            Some(bound) => return Ok(Attempt::Blocked(bound)),
            None => {}
        }

        if let Some(duplicate) = db.get_record_by_server_id(key.kind, server_id)? {
            let has_entry = db.get_ledger_entry(key.kind, duplicate.local_id)?.is_some();
            if duplicate.sync_status != SyncStatus::Synced || has_entry {
                return Ok(Attempt::Blocked(server_id));
            }
            db.delete_record(key.kind, duplicate.local_id)?;
        }

        db.bind_server_id(key.kind, key.local_id, server_id)?;
        if key.kind == EntityKind::Patient {
            db.propagate_parent_server_id(key.local_id, server_id)?;
        }
        Ok(Attempt::Done(BindOutcome::Bound))
    })?;

    match attempt {
        Attempt::Done(outcome) => {
            if outcome == BindOutcome::Bound {
                info!(kind = %key.kind, local_id = key.local_id, server_id, "Bound server id");
            }
            Ok(outcome)
        }
        Attempt::Blocked(bound) => {
            warn!(
                kind = %key.kind,
                local_id = key.local_id,
                bound,
                returned = server_id,
                "Server id conflict"
            );
            Err(ReconcileError::ServerIdConflict {
                key,
                bound,
                returned: server_id,
            })
        }
    }
}
