//! Online-first, offline-fallback record operations.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::locks::KeyLocks;
use super::outcome::{Degraded, DeleteOutcome, FetchOutcome, RemoteDelete, SaveOutcome};
use crate::connectivity::Connectivity;
use crate::db::{Database, DbResult, ListFilter, Tombstone};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{ConfirmMode, Ledger};
use crate::models::{
    EntityKind, LedgerAction, LedgerEntry, ParentRef, Record, RecordKey, SyncStatus,
};
use crate::reconcile::{self, BindOutcome, ReconcileError};
use crate::remote::{self, NormalizedResponse, RemoteClient, RemoteError};
use crate::risk;

/// A record just written locally, with its ledger entry in place.
pub(super) struct Written {
    pub record: Record,
    /// A pending entry already existed before this write
    pub prior_pending: bool,
}

/// What one push attempt did.
#[derive(Debug)]
pub(super) enum Pushed {
    /// Confirmed now, or already confirmed by another flow
    Synced,
    /// Edited again mid-flight; the newer edit stays queued
    Stale,
    AwaitingParent,
    /// Deleted locally
    Gone,
    Failed(RemoteError),
    Unbound(String),
}

impl Pushed {
    pub(super) fn degraded(&self) -> Option<Degraded> {
        match self {
            Pushed::Synced | Pushed::Gone => None,
            Pushed::Stale => Some(Degraded::Superseded),
            Pushed::AwaitingParent => Some(Degraded::AwaitingParent),
            Pushed::Failed(e) => Some(Degraded::from_remote(e)),
            Pushed::Unbound(message) => Some(Degraded::Reconciliation(message.clone())),
        }
    }
}

enum Snapshot {
    Gone,
    Clean,
    Dirty {
        record: Record,
        parent_server_id: Option<i64>,
    },
}

/// The sync policy controller.
///
/// Owns the local mirror and drives every operation through it: writes are
/// persisted and queued first, then pushed if the network allows.
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    remote: RemoteClient,
    connectivity: Arc<dyn Connectivity>,
    pub(super) locks: KeyLocks,
    pub(super) syncing: AtomicBool,
}

impl SyncEngine {
    pub fn new(db: Database, remote: RemoteClient, connectivity: Arc<dyn Connectivity>) -> Self {
        Self::with_shared_db(Arc::new(Mutex::new(db)), remote, connectivity)
    }

    pub fn with_shared_db(
        db: Arc<Mutex<Database>>,
        remote: RemoteClient,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            db,
            remote,
            connectivity,
            locks: KeyLocks::new(),
            syncing: AtomicBool::new(false),
        }
    }

    pub(super) fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub(super) fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    /// Run `f` with the database locked. Never held across an await.
    pub(super) fn store<T>(&self, f: impl FnOnce(&Database) -> DbResult<T>) -> EngineResult<T> {
        let db = self.db.lock().map_err(|_| EngineError::poisoned())?;
        Ok(f(&db)?)
    }

    fn store_with<T>(&self, f: impl FnOnce(&Database) -> EngineResult<T>) -> EngineResult<T> {
        let db = self.db.lock().map_err(|_| EngineError::poisoned())?;
        f(&db)
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Persist `record` locally, then try to confirm it remotely.
    ///
    /// Never fails because of the network: the outcome says whether the
    /// record is synced or why it is still pending. A risk-bearing child
    /// also updates its patient; that follow-up never affects this result.
    pub async fn save(&self, record: Record) -> EngineResult<SaveOutcome> {
        let outcome = self.save_one(record).await?;

        if outcome.record.payload.risk_signal().is_some() {
            if let Err(e) = self.propagate_risk(&outcome.record).await {
                warn!(
                    kind = %outcome.record.kind(),
                    local_id = outcome.record.local_id,
                    error = %e,
                    "Risk propagation failed"
                );
            }
        }

        Ok(outcome)
    }

    async fn save_one(&self, record: Record) -> EngineResult<SaveOutcome> {
        let written = self.store_with(|db| persist(db, record))?;
        self.push_written(written).await
    }

    /// Apply a child's risk signal to its patient and save the patient.
    async fn propagate_risk(&self, child: &Record) -> EngineResult<Option<SaveOutcome>> {
        let written = self.store_with(|db| match risk::plan_update(db, child)? {
            Some(patient) => persist(db, patient).map(Some),
            None => Ok(None),
        })?;

        match written {
            Some(written) => {
                info!(
                    local_id = written.record.local_id,
                    source = %child.kind(),
                    "Patient flagged high risk"
                );
                Ok(Some(self.push_written(written).await?))
            }
            None => Ok(None),
        }
    }

    async fn push_written(&self, written: Written) -> EngineResult<SaveOutcome> {
        let key = written.record.key();

        let degraded = if self.is_online() {
            let mode = if written.prior_pending {
                ConfirmMode::Retain
            } else {
                ConfirmMode::Discard
            };
            self.push(key, mode).await?.degraded()
        } else {
            debug!(kind = %key.kind, local_id = key.local_id, "Offline, queued");
            Some(Degraded::Offline)
        };

        let record = self
            .store(|db| db.get_record(key.kind, key.local_id))?
            .unwrap_or(written.record);
        Ok(SaveOutcome {
            sync_status: record.sync_status,
            record,
            degraded,
        })
    }

    /// Push the current state of `key` if it is still owed.
    ///
    /// Holds the key lock across the round-trip and re-reads the record
    /// under it, so a record already confirmed by another flow is never
    /// sent twice.
    pub(super) async fn push(&self, key: RecordKey, mode: ConfirmMode) -> EngineResult<Pushed> {
        let _guard = self.locks.lock(key).await;

        let snapshot = self.store(|db| {
            let Some(record) = db.get_record(key.kind, key.local_id)? else {
                db.delete_ledger_entry(key.kind, key.local_id)?;
                return Ok(Snapshot::Gone);
            };
            let owed = db
                .get_ledger_entry(key.kind, key.local_id)?
                .map(|entry| entry.is_pending())
                .unwrap_or(false);
            if !owed {
                return Ok(Snapshot::Clean);
            }
            let parent_server_id = if key.kind.has_parent() {
                db.resolve_parent_server_id(&record.parent)?
            } else {
                None
            };
            Ok(Snapshot::Dirty {
                record,
                parent_server_id,
            })
        })?;

        let (record, parent_server_id) = match snapshot {
            Snapshot::Gone => return Ok(Pushed::Gone),
            Snapshot::Clean => return Ok(Pushed::Synced),
            Snapshot::Dirty {
                record,
                parent_server_id,
            } => (record, parent_server_id),
        };

        if key.kind.has_parent() && parent_server_id.is_none() {
            debug!(kind = %key.kind, local_id = key.local_id, "Parent not synced yet");
            return Ok(Pushed::AwaitingParent);
        }

        let action = reconcile::select_action(&record);
        let body = remote::to_wire(&record, parent_server_id)
            .map_err(|e| EngineError::InvalidRecord(e.to_string()))?;

        let response = match (action, record.server_id) {
            (LedgerAction::Update, Some(server_id)) => {
                self.remote.update(key.kind, server_id, body).await
            }
            _ => self.remote.create(key.kind, body).await,
        };

        match response {
            Ok(response) => {
                self.store(|db| complete(db, key, action, record.generation, &response, mode))
            }
            Err(e) => {
                warn!(
                    kind = %key.kind,
                    local_id = key.local_id,
                    action = action.as_str(),
                    error = %e,
                    "Push failed, keeping local copy"
                );
                self.store(|db| db.record_ledger_failure(key.kind, key.local_id, &e.to_string()))?;
                Ok(Pushed::Failed(e))
            }
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete locally, and remotely if possible.
    ///
    /// The local row always goes. A remote delete that cannot be confirmed
    /// leaves a tombstone, retried by `force_sync`. Deleting a patient also
    /// removes its child records; those the server knows get tombstones.
    pub async fn delete(&self, kind: EntityKind, local_id: i64) -> EngineResult<DeleteOutcome> {
        let key = RecordKey::new(kind, local_id);
        let _guard = self.locks.lock(key).await;

        let Some(record) = self.store(|db| db.get_record(kind, local_id))? else {
            return Ok(DeleteOutcome {
                removed: false,
                remote: RemoteDelete::NotNeeded,
                children_removed: 0,
            });
        };

        let remote = match record.server_id.filter(|id| *id > 0) {
            None => RemoteDelete::NotNeeded,
            Some(_) if !self.is_online() => RemoteDelete::Deferred("offline".into()),
            Some(server_id) => match self.remote.delete(kind, server_id).await {
                Ok(_) => RemoteDelete::Confirmed,
                Err(e) if e.is_not_found() => RemoteDelete::Confirmed,
                Err(e) => {
                    warn!(kind = %kind, local_id, server_id, error = %e, "Remote delete failed");
                    RemoteDelete::Deferred(e.to_string())
                }
            },
        };

        let children_removed = self.store(|db| {
            db.atomically(|db| {
                db.delete_record(kind, local_id)?;
                db.delete_ledger_entry(kind, local_id)?;
                if let (RemoteDelete::Deferred(_), Some(server_id)) = (&remote, record.server_id) {
                    db.add_tombstone(kind, server_id)?;
                }
                match kind {
                    EntityKind::Patient => remove_children(db, &record),
                    _ => Ok(0),
                }
            })
        })?;

        info!(kind = %kind, local_id, remote = ?remote, children_removed, "Deleted");
        Ok(DeleteOutcome {
            removed: true,
            remote,
            children_removed,
        })
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    /// List records, refreshing the local mirror from the server first when
    /// online. Offline or on a remote failure the local rows are returned
    /// marked stale.
    pub async fn fetch_list(
        &self,
        kind: EntityKind,
        filter: ListFilter,
    ) -> EngineResult<FetchOutcome> {
        if !self.is_online() {
            let records = self.store(|db| db.list_records_filtered(kind, &filter))?;
            return Ok(FetchOutcome::local(records, true, None));
        }

        let parent_server_id = match filter.parent.filter(|_| kind.has_parent()) {
            Some(parent) => match self.store(|db| db.resolve_parent_server_id(&parent))? {
                Some(server_id) => Some(server_id),
                // The server cannot know children of a patient it has never seen
                None => {
                    let records = self.store(|db| db.list_records_filtered(kind, &filter))?;
                    return Ok(FetchOutcome::local(records, false, None));
                }
            },
            None => None,
        };

        let clock = self.store(|db| db.current_generation())?;

        let response = match self.remote.list(kind, parent_server_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!(kind = %kind, error = %e, "List fetch failed, serving local mirror");
                let records = self.store(|db| db.list_records_filtered(kind, &filter))?;
                return Ok(FetchOutcome::local(records, true, Some(e.to_string())));
            }
        };

        self.store(|db| {
            let mut outcome =
                db.atomically(|db| apply_rows(db, kind, parent_server_id, clock, response))?;
            db.set_sync_state(
                &format!("last_fetch_at:{}", kind.table()),
                &Utc::now().to_rfc3339(),
            )?;
            outcome.records = db.list_records_filtered(kind, &filter)?;
            info!(
                kind = %kind,
                inserted = outcome.inserted,
                updated = outcome.updated,
                skipped = outcome.skipped,
                "Mirror refreshed"
            );
            Ok(outcome)
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_record(&self, kind: EntityKind, local_id: i64) -> EngineResult<Option<Record>> {
        self.store(|db| db.get_record(kind, local_id))
    }

    /// Local rows only; no network.
    pub fn list_local(&self, kind: EntityKind, filter: &ListFilter) -> EngineResult<Vec<Record>> {
        self.store(|db| db.list_records_filtered(kind, filter))
    }

    pub fn pending_count(&self) -> EngineResult<u32> {
        self.store(|db| Ledger::new(db).pending_count())
    }

    pub fn list_pending(&self) -> EngineResult<Vec<LedgerEntry>> {
        self.store(|db| Ledger::new(db).list_pending())
    }

    /// Pending entries and retained sync history.
    pub fn list_ledger(&self) -> EngineResult<Vec<LedgerEntry>> {
        self.store(|db| Ledger::new(db).list_all())
    }

    pub fn tombstones(&self) -> EngineResult<Vec<Tombstone>> {
        self.store(|db| db.list_tombstones())
    }

    /// Records whose status flag disagrees with the ledger. Empty when healthy.
    pub fn ledger_disagreements(&self) -> EngineResult<Vec<RecordKey>> {
        self.store(|db| Ledger::new(db).disagreements())
    }

    pub fn purge_synced(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        self.store(|db| Ledger::new(db).purge_synced(older_than))
    }

    /// Time of the last completed sync pass, if any.
    pub fn last_sync_at(&self) -> EngineResult<Option<String>> {
        self.store(|db| {
            Ok(db
                .get_sync_state("last_sync_at")?
                .filter(|value| !value.is_empty()))
        })
    }
}

/// Write `record` and its ledger entry as one unit, stamping a fresh generation.
fn persist(db: &Database, mut record: Record) -> EngineResult<Written> {
    let kind = record.kind();
    if kind.has_parent() && record.parent.is_empty() {
        return Err(EngineError::InvalidRecord(format!(
            "{} record has no patient",
            kind.label()
        )));
    }

    let existing = if record.is_persisted() {
        let found = db
            .get_record(kind, record.local_id)?
            .ok_or(EngineError::NotFound(record.key()))?;
        Some(found)
    } else {
        None
    };

    let prior_pending = db.atomically(|db| {
        record.generation = db.next_generation()?;
        record.sync_status = SyncStatus::Pending;
        record.touch();
        if kind.has_parent() && record.parent.server_id.is_none() {
            record.parent.server_id = db.resolve_parent_server_id(&record.parent)?;
        }

        let prior_pending = match &existing {
            Some(existing) => {
                // Identity and creation time belong to the stored row
                record.server_id = existing.server_id;
                record.created_at = existing.created_at.clone();
                db.update_record(&record)?;
                db.get_ledger_entry(kind, record.local_id)?
                    .map(|entry| entry.is_pending())
                    .unwrap_or(false)
            }
            None => {
                record.server_id = None;
                db.insert_record(&mut record)?;
                false
            }
        };

        Ledger::new(db).enqueue(&record)?;
        Ok(prior_pending)
    })?;

    debug!(
        kind = %kind,
        local_id = record.local_id,
        generation = record.generation,
        "Persisted locally"
    );
    Ok(Written {
        record,
        prior_pending,
    })
}

/// Apply a successful push response under the key lock.
fn complete(
    db: &Database,
    key: RecordKey,
    action: LedgerAction,
    generation: i64,
    response: &NormalizedResponse,
    mode: ConfirmMode,
) -> DbResult<Pushed> {
    let ledger = Ledger::new(db);

    if action == LedgerAction::Create {
        let bound = reconcile::require_server_id(key, response.id).and_then(|server_id| {
            reconcile::bind_server_id(db, key, server_id).map(|outcome| (server_id, outcome))
        });
        match bound {
            Ok((server_id, BindOutcome::Gone)) => {
                db.add_tombstone(key.kind, server_id)?;
                ledger.discard(key)?;
                return Ok(Pushed::Gone);
            }
            Ok(_) => {}
            Err(ReconcileError::Store(e)) => return Err(e),
            Err(e) => {
                warn!(kind = %key.kind, local_id = key.local_id, error = %e, "Reconciliation failed");
                ledger.record_failure(key, &e.to_string())?;
                return Ok(Pushed::Unbound(e.to_string()));
            }
        }
    }

    let Some(current) = db.get_record(key.kind, key.local_id)? else {
        ledger.discard(key)?;
        return Ok(Pushed::Gone);
    };

    if current.generation != generation {
        // Upload carried an older edit; queue the newer one as an update
        debug!(
            kind = %key.kind,
            local_id = key.local_id,
            sent = generation,
            current = current.generation,
            "Stale completion"
        );
        ledger.enqueue(&current)?;
        return Ok(Pushed::Stale);
    }

    ledger.confirm(key, mode)?;
    info!(
        kind = %key.kind,
        local_id = key.local_id,
        server_id = ?current.server_id,
        "Synced"
    );
    Ok(Pushed::Synced)
}

/// Remove every child of `patient` along with its ledger entry.
///
/// A child with a server id leaves a tombstone so the remote copy goes too.
fn remove_children(db: &Database, patient: &Record) -> DbResult<u32> {
    let parent = ParentRef {
        local_id: Some(patient.local_id),
        server_id: patient.server_id.filter(|id| *id > 0),
    };
    let mut removed = 0;
    for kind in EntityKind::ALL.into_iter().filter(|k| k.has_parent()) {
        for child in db.list_records_filtered(kind, &ListFilter::children_of(parent))? {
            db.delete_record(kind, child.local_id)?;
            db.delete_ledger_entry(kind, child.local_id)?;
            if let Some(server_id) = child.server_id.filter(|id| *id > 0) {
                db.add_tombstone(kind, server_id)?;
            }
            removed += 1;
        }
    }
    Ok(removed)
}

/// Upsert fetched rows into the mirror.
fn apply_rows(
    db: &Database,
    kind: EntityKind,
    parent_server_id: Option<i64>,
    clock: i64,
    response: NormalizedResponse,
) -> DbResult<FetchOutcome> {
    let mut outcome = FetchOutcome::default();

    for row in response.rows {
        let wire = match remote::from_wire(kind, row) {
            Ok(wire) => wire,
            Err(e) => {
                debug!(kind = %kind, error = %e, "Skipping undecodable row");
                outcome.skipped += 1;
                continue;
            }
        };

        if db.is_tombstoned(kind, wire.server_id)? {
            outcome.skipped += 1;
            continue;
        }

        let parent = if kind.has_parent() {
            let server_id = wire.parent_server_id.or(parent_server_id);
            let local_id = match server_id {
                Some(id) => db.local_id_for_server_id(EntityKind::Patient, id)?,
                None => None,
            };
            ParentRef { local_id, server_id }
        } else {
            ParentRef::default()
        };

        match db.get_record_by_server_id(kind, wire.server_id)? {
            Some(mut existing) => {
                if existing.sync_status == SyncStatus::Pending || existing.generation > clock {
                    outcome.skipped += 1;
                    continue;
                }
                existing.payload = wire.payload;
                existing.parent = ParentRef {
                    local_id: parent.local_id.or(existing.parent.local_id),
                    server_id: parent.server_id.or(existing.parent.server_id),
                };
                existing.touch();
                db.update_record(&existing)?;
                outcome.updated += 1;
            }
            None => {
                let mut record = Record::new(wire.payload);
                record.server_id = Some(wire.server_id);
                record.sync_status = SyncStatus::Synced;
                record.parent = parent;
                db.insert_record(&mut record)?;
                outcome.inserted += 1;
            }
        }
    }

    Ok(outcome)
}
