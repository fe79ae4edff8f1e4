//! Pending-operation ledger.
//!
//! The ledger is the durable record of which local writes the server has
//! not confirmed. Each record's `sync_status` column is a cache of it, and
//! every method here that changes one changes the other in the same
//! transaction.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::{Database, DbResult};
use crate::models::{LedgerAction, LedgerEntry, LedgerStatus, Record, RecordKey, SyncStatus};

/// What to do with a ledger entry once its write is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Flip to `SYNCED` and keep as history.
    Retain,
    /// Remove it. Used when the write was confirmed on its first attempt.
    Discard,
}

/// Ledger operations over a borrowed database.
pub struct Ledger<'a> {
    db: &'a Database,
}

impl<'a> Ledger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Mark `record` pending and snapshot it into the ledger.
    ///
    /// Idempotent per key: a second enqueue replaces the snapshot.
    pub fn enqueue(&self, record: &Record) -> DbResult<()> {
        let action = if record.is_bound() {
            LedgerAction::Update
        } else {
            LedgerAction::Create
        };
        let snapshot = record.payload.to_json()?;

        self.db.atomically(|db| {
            db.set_sync_status(record.kind(), record.local_id, SyncStatus::Pending)?;
            db.upsert_ledger_entry(
                record.kind(),
                record.local_id,
                action,
                &snapshot,
                record.generation,
            )
        })?;

        debug!(
            kind = %record.kind(),
            local_id = record.local_id,
            action = action.as_str(),
            generation = record.generation,
            "Enqueued"
        );
        Ok(())
    }

    /// All pending entries, oldest first.
    pub fn list_pending(&self) -> DbResult<Vec<LedgerEntry>> {
        self.db.list_ledger(Some(LedgerStatus::Pending))
    }

    /// Pending entries followed by retained history, in enqueue order.
    pub fn list_all(&self) -> DbResult<Vec<LedgerEntry>> {
        self.db.list_ledger(None)
    }

    pub fn get(&self, key: RecordKey) -> DbResult<Option<LedgerEntry>> {
        self.db.get_ledger_entry(key.kind, key.local_id)
    }

    /// Flip the entry and the record to `SYNCED` together.
    pub fn mark_synced(&self, key: RecordKey) -> DbResult<()> {
        self.confirm(key, ConfirmMode::Retain)
    }

    /// Confirm a write: the record becomes `SYNCED` and the entry is either
    /// retained as history or removed.
    ///
    /// The record must already carry a server id.
    pub fn confirm(&self, key: RecordKey, mode: ConfirmMode) -> DbResult<()> {
        self.db.atomically(|db| {
            db.set_sync_status(key.kind, key.local_id, SyncStatus::Synced)?;
            match mode {
                ConfirmMode::Retain => {
                    db.set_ledger_status(key.kind, key.local_id, LedgerStatus::Synced)?;
                }
                ConfirmMode::Discard => {
                    db.delete_ledger_entry(key.kind, key.local_id)?;
                }
            }
            Ok(())
        })
    }

    /// Note a failed attempt; the entry stays pending.
    pub fn record_failure(&self, key: RecordKey, error: &str) -> DbResult<()> {
        self.db.record_ledger_failure(key.kind, key.local_id, error)?;
        Ok(())
    }

    /// Drop an entry whose record no longer exists.
    pub fn discard(&self, key: RecordKey) -> DbResult<bool> {
        self.db.delete_ledger_entry(key.kind, key.local_id)
    }

    pub fn pending_count(&self) -> DbResult<u32> {
        self.db.count_ledger(LedgerStatus::Pending)
    }

    /// Delete synced history older than `older_than`.
    pub fn purge_synced(&self, older_than: DateTime<Utc>) -> DbResult<usize> {
        self.db.purge_ledger(&older_than.to_rfc3339())
    }

    /// Records whose status flag disagrees with the ledger.
    ///
    /// Empty in a healthy store.
    pub fn disagreements(&self) -> DbResult<Vec<RecordKey>> {
        let mut keys = Vec::new();

        let pending: Vec<RecordKey> = self.list_pending()?.iter().map(LedgerEntry::key).collect();
        for key in &pending {
            let flagged = self
                .db
                .get_record(key.kind, key.local_id)?
                .map(|r| r.sync_status == SyncStatus::Pending)
                .unwrap_or(false);
            if !flagged {
                keys.push(*key);
            }
        }

        for kind in crate::models::EntityKind::ALL {
            for record in self.db.list_records_by_status(kind, SyncStatus::Pending)? {
                if !pending.contains(&record.key()) {
                    keys.push(record.key());
                }
            }
        }

        Ok(keys)
    }
}
