//! Asha Sync Core Library
//!
//! Local-first record sync for community health workers in low-connectivity
//! areas.
//!
//! # Architecture
//!
//! ```text
//!   App layer (Android / iOS via UniFFI)
//!          │ save / delete / fetch_list / force_sync
//!          ▼
//!   ┌──────────────────────────────┐       ┌────────────────────┐
//!   │          SyncEngine          │──────►│    Connectivity    │
//!   │  per-key locks, single pass  │       └────────────────────┘
//!   └───┬──────────┬───────────┬───┘
//!       │          │           │
//!       ▼          ▼           ▼
//!   ┌────────┐ ┌─────────┐ ┌──────────────────────────┐
//!   │ Ledger │ │  Risk   │ │      RemoteClient        │
//!   └───┬────┘ └────┬────┘ │ timeout, retry, envelope │
//!       │           │      └────────────┬─────────────┘
//!       ▼           ▼                   │ create response
//!   ┌────────────────────┐       ┌──────▼──────┐
//!   │  SQLite mirror     │◄──────│  Reconcile  │
//!   │  records + ledger  │ bind  └─────────────┘
//!   └────────────────────┘
//! ```
//!
//! # Core Principle
//!
//! **A local write is never lost to the network.** Every write lands in the
//! mirror and the pending ledger before any request is made; the server only
//! ever moves a record from `PENDING` to `SYNCED`.
//!
//! # Modules
//!
//! - [`db`]: SQLite mirror of all five entity kinds, ledger and tombstones
//! - [`models`]: Domain types (Record, Patient, PregnancyVisit, etc.)
//! - [`ledger`]: Pending operation ledger
//! - [`reconcile`]: Binding server ids to local records
//! - [`risk`]: Patient high-risk propagation from child records
//! - [`remote`]: Backend API client and response normalization
//! - [`sync`]: The sync engine

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod risk;
pub mod sync;

// Re-export commonly used types
pub use config::SyncConfig;
pub use connectivity::{AlwaysOffline, AlwaysOnline, Connectivity, ConnectivityFlag};
pub use db::{Database, ListFilter};
pub use error::{EngineError, EngineResult, ErrorCategory};
pub use models::{
    ChildGrowth, EntityKind, LedgerAction, LedgerEntry, LedgerStatus, ParentRef, Patient,
    PatientCategory, PregnancyVisit, Record, RecordKey, RecordPayload, SyncStatus, Vaccination,
    Visit,
};
pub use remote::{HttpTransport, RemoteClient, RemoteError, Transport};
pub use sync::{
    Degraded, DeleteOutcome, FetchOutcome, RemoteDelete, SaveOutcome, SyncEngine, SyncReport,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

use chrono::{Duration, Utc};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum AshaSyncError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<db::DbError> for AshaSyncError {
    fn from(e: db::DbError) -> Self {
        AshaSyncError::DatabaseError(e.to_string())
    }
}

impl From<EngineError> for AshaSyncError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(e) => e.into(),
            EngineError::NotFound(key) => AshaSyncError::NotFound(key.to_string()),
            EngineError::InvalidRecord(message) => AshaSyncError::InvalidInput(message),
        }
    }
}

impl From<config::ConfigError> for AshaSyncError {
    fn from(e: config::ConfigError) -> Self {
        AshaSyncError::ConfigError(e.to_string())
    }
}

impl From<RemoteError> for AshaSyncError {
    fn from(e: RemoteError) -> Self {
        AshaSyncError::NetworkError(e.to_string())
    }
}

impl From<serde_json::Error> for AshaSyncError {
    fn from(e: serde_json::Error) -> Self {
        AshaSyncError::SerializationError(e.to_string())
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create the mirror at `db_path`, talking to the backend described
/// by `config_toml` (defaults when absent).
#[uniffi::export]
pub fn open_sync_core(
    db_path: String,
    config_toml: Option<String>,
) -> Result<Arc<AshaSyncCore>, AshaSyncError> {
    let db = Database::open(&db_path)?;
    AshaSyncCore::build(db, config_toml)
}

/// Create an in-memory mirror (for testing).
#[uniffi::export]
pub fn open_sync_core_in_memory(
    config_toml: Option<String>,
) -> Result<Arc<AshaSyncCore>, AshaSyncError> {
    let db = Database::open_in_memory()?;
    AshaSyncCore::build(db, config_toml)
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe sync engine handle for FFI.
#[derive(uniffi::Object)]
pub struct AshaSyncCore {
    engine: Arc<SyncEngine>,
    connectivity: Arc<ConnectivityFlag>,
}

impl AshaSyncCore {
    fn build(db: Database, config_toml: Option<String>) -> Result<Arc<Self>, AshaSyncError> {
        let config = match config_toml {
            Some(text) => SyncConfig::from_toml_str(&text)?,
            None => SyncConfig::default(),
        };
        let transport = HttpTransport::new(&config)?;
        let remote = RemoteClient::new(Arc::new(transport), config);

        let connectivity = Arc::new(ConnectivityFlag::default());
        let engine = SyncEngine::new(db, remote, connectivity.clone());
        Ok(Arc::new(Self {
            engine: Arc::new(engine),
            connectivity,
        }))
    }
}

#[uniffi::export]
impl AshaSyncCore {
    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Called from the platform's network callback.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // =========================================================================
    // Local Queries
    // =========================================================================

    /// Get a record by local ID.
    pub fn get_record(
        &self,
        kind: String,
        local_id: i64,
    ) -> Result<Option<FfiRecord>, AshaSyncError> {
        let record = self.engine.get_record(parse_kind(&kind)?, local_id)?;
        record.map(FfiRecord::try_from).transpose()
    }

    /// Number of writes the server has not confirmed.
    pub fn pending_count(&self) -> Result<u32, AshaSyncError> {
        Ok(self.engine.pending_count()?)
    }

    /// Pending ledger entries, oldest first.
    pub fn list_pending(&self) -> Result<Vec<FfiLedgerEntry>, AshaSyncError> {
        let entries = self.engine.list_pending()?;
        entries.into_iter().map(FfiLedgerEntry::try_from).collect()
    }

    /// Pending entries plus retained sync history.
    pub fn sync_history(&self) -> Result<Vec<FfiLedgerEntry>, AshaSyncError> {
        let entries = self.engine.list_ledger()?;
        entries.into_iter().map(FfiLedgerEntry::try_from).collect()
    }

    pub fn last_sync_at(&self) -> Result<Option<String>, AshaSyncError> {
        Ok(self.engine.last_sync_at()?)
    }

    /// Drop sync history older than `days`.
    pub fn purge_history(&self, days: u32) -> Result<u32, AshaSyncError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        Ok(self.engine.purge_synced(cutoff)? as u32)
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl AshaSyncCore {
    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Save a record locally and try to sync it.
    pub async fn save(&self, record: FfiRecord) -> Result<FfiSaveOutcome, AshaSyncError> {
        let record = Record::try_from(record)?;
        let outcome = self.engine.save(record).await?;
        FfiSaveOutcome::try_from(outcome)
    }

    /// Delete a record locally and remotely when possible.
    pub async fn delete(
        &self,
        kind: String,
        local_id: i64,
    ) -> Result<FfiDeleteOutcome, AshaSyncError> {
        let outcome = self.engine.delete(parse_kind(&kind)?, local_id).await?;
        Ok(outcome.into())
    }

    /// Refresh and list records of one kind.
    pub async fn fetch_list(
        &self,
        kind: String,
        filter: FfiListFilter,
    ) -> Result<FfiFetchResult, AshaSyncError> {
        let outcome = self
            .engine
            .fetch_list(parse_kind(&kind)?, filter.into())
            .await?;
        FfiFetchResult::try_from(outcome)
    }

    /// Replay all pending writes and owed deletes.
    pub async fn force_sync(&self) -> Result<FfiSyncReport, AshaSyncError> {
        let report = self.engine.force_sync().await?;
        Ok(report.into())
    }
}

fn parse_kind(kind: &str) -> Result<EntityKind, AshaSyncError> {
    kind.parse().map_err(AshaSyncError::InvalidInput)
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe record. The entity body travels as JSON in the backend's field
/// names.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRecord {
    /// Table name: `patients`, `visits`, `pregnancy_visits`, `child_growth`, `vaccinations`
    pub kind: String,
    /// 0 for a record not yet saved
    pub local_id: i64,
    pub server_id: Option<i64>,
    pub parent_local_id: Option<i64>,
    pub parent_server_id: Option<i64>,
    pub sync_status: String,
    pub created_at: String,
    pub updated_at: String,
    pub payload_json: String,
}

impl TryFrom<Record> for FfiRecord {
    type Error = AshaSyncError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: record.kind().table().to_string(),
            local_id: record.local_id,
            server_id: record.server_id,
            parent_local_id: record.parent.local_id,
            parent_server_id: record.parent.server_id,
            sync_status: record.sync_status.as_str().to_string(),
            payload_json: record.payload.to_json()?.to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl TryFrom<FfiRecord> for Record {
    type Error = AshaSyncError;

    fn try_from(record: FfiRecord) -> Result<Self, Self::Error> {
        let kind = parse_kind(&record.kind)?;
        let payload = RecordPayload::from_json(kind, serde_json::from_str(&record.payload_json)?)?;

        let mut out = Record::new(payload);
        out.local_id = record.local_id;
        out.server_id = record.server_id;
        out.parent = ParentRef {
            local_id: record.parent_local_id,
            server_id: record.parent_server_id,
        };
        if !record.created_at.is_empty() {
            out.created_at = record.created_at;
        }
        Ok(out)
    }
}

/// FFI-safe list filter. Patient-only fields are ignored for other kinds.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiListFilter {
    pub parent_local_id: Option<i64>,
    pub parent_server_id: Option<i64>,
    pub category: Option<String>,
    pub name_prefix: Option<String>,
}

impl From<FfiListFilter> for ListFilter {
    fn from(filter: FfiListFilter) -> Self {
        let parent = ParentRef {
            local_id: filter.parent_local_id,
            server_id: filter.parent_server_id,
        };
        ListFilter {
            parent: (!parent.is_empty()).then_some(parent),
            category: filter.category.map(PatientCategory::from),
            name_prefix: filter.name_prefix.filter(|p| !p.trim().is_empty()),
        }
    }
}

/// FFI-safe save outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSaveOutcome {
    pub record: FfiRecord,
    pub synced: bool,
    /// `offline`, `transient`, `rejected`, `awaiting_parent`, `superseded`, `reconciliation`
    pub degraded_reason: Option<String>,
    /// Text to show the user, when the server refused the write
    pub message: Option<String>,
}

impl TryFrom<SaveOutcome> for FfiSaveOutcome {
    type Error = AshaSyncError;

    fn try_from(outcome: SaveOutcome) -> Result<Self, Self::Error> {
        let synced = outcome.is_synced();
        let message = outcome
            .degraded
            .as_ref()
            .and_then(Degraded::message)
            .map(str::to_string);
        let degraded_reason = outcome.degraded.as_ref().map(|d| d.reason().to_string());
        Ok(Self {
            record: outcome.record.try_into()?,
            synced,
            degraded_reason,
            message,
        })
    }
}

/// FFI-safe delete outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDeleteOutcome {
    pub removed: bool,
    /// `confirmed`, `deferred` or `not_needed`
    pub remote: String,
    pub error: Option<String>,
    pub children_removed: u32,
}

impl From<DeleteOutcome> for FfiDeleteOutcome {
    fn from(outcome: DeleteOutcome) -> Self {
        let (remote, error) = match outcome.remote {
            RemoteDelete::Confirmed => ("confirmed", None),
            RemoteDelete::Deferred(error) => ("deferred", Some(error)),
            RemoteDelete::NotNeeded => ("not_needed", None),
        };
        Self {
            removed: outcome.removed,
            remote: remote.to_string(),
            error,
            children_removed: outcome.children_removed,
        }
    }
}

/// FFI-safe list result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFetchResult {
    pub records: Vec<FfiRecord>,
    pub stale: bool,
    pub error: Option<String>,
}

impl TryFrom<FetchOutcome> for FfiFetchResult {
    type Error = AshaSyncError;

    fn try_from(outcome: FetchOutcome) -> Result<Self, Self::Error> {
        Ok(Self {
            records: outcome
                .records
                .into_iter()
                .map(FfiRecord::try_from)
                .collect::<Result<_, _>>()?,
            stale: outcome.stale,
            error: outcome.error,
        })
    }
}

/// FFI-safe sync pass report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    pub pass_id: Option<String>,
    pub succeeded: u32,
    pub failed: u32,
    pub deferred: u32,
    pub skipped: u32,
    pub deletes_confirmed: u32,
    pub deletes_failed: u32,
    pub offline: bool,
    pub already_running: bool,
}

impl From<SyncReport> for FfiSyncReport {
    fn from(report: SyncReport) -> Self {
        Self {
            pass_id: report.pass_id,
            succeeded: report.succeeded,
            failed: report.failed,
            deferred: report.deferred,
            skipped: report.skipped,
            deletes_confirmed: report.deletes_confirmed,
            deletes_failed: report.deletes_failed,
            offline: report.offline,
            already_running: report.already_running,
        }
    }
}

/// FFI-safe ledger entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLedgerEntry {
    pub kind: String,
    pub local_id: i64,
    pub action: String,
    pub status: String,
    pub payload_json: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub last_attempt_at: Option<String>,
}

impl TryFrom<LedgerEntry> for FfiLedgerEntry {
    type Error = AshaSyncError;

    fn try_from(entry: LedgerEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: entry.kind.table().to_string(),
            local_id: entry.local_id,
            action: entry.action.as_str().to_string(),
            status: entry.status.as_str().to_string(),
            payload_json: serde_json::to_string(&entry.payload)?,
            retry_count: entry.retry_count,
            last_error: entry.last_error,
            created_at: entry.created_at,
            last_attempt_at: entry.last_attempt_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient_json(name: &str) -> String {
        serde_json::json!({ "name": name, "category": "Pregnant Woman" }).to_string()
    }

    #[test]
    fn test_ffi_record_conversion() {
        let ffi = FfiRecord {
            kind: "patients".into(),
            local_id: 0,
            server_id: None,
            parent_local_id: None,
            parent_server_id: None,
            sync_status: "PENDING".into(),
            created_at: String::new(),
            updated_at: String::new(),
            payload_json: patient_json("Radha"),
        };

        let record = Record::try_from(ffi).unwrap();
        assert_eq!(record.kind(), EntityKind::Patient);
        assert_eq!(
            record.payload.as_patient().unwrap().category,
            PatientCategory::PregnantWoman
        );
        assert!(!record.created_at.is_empty());

        let back = FfiRecord::try_from(record).unwrap();
        assert_eq!(back.kind, "patients");
        assert_eq!(back.sync_status, "PENDING");
    }

    #[test]
    fn test_unknown_kind_is_invalid_input() {
        let ffi = FfiRecord {
            kind: "encounters".into(),
            local_id: 0,
            server_id: None,
            parent_local_id: None,
            parent_server_id: None,
            sync_status: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
            payload_json: "{}".into(),
        };
        assert!(matches!(
            Record::try_from(ffi),
            Err(AshaSyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_filter_conversion() {
        let filter: ListFilter = FfiListFilter {
            category: Some("pregnant woman".into()),
            name_prefix: Some("  ".into()),
            ..FfiListFilter::default()
        }
        .into();
        assert_eq!(filter.category, Some(PatientCategory::PregnantWoman));
        assert!(filter.parent.is_none());
        assert!(filter.name_prefix.is_none());
    }

    #[test]
    fn test_offline_core_keeps_writes() {
        let core = open_sync_core_in_memory(None).unwrap();
        core.set_online(false);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime
            .block_on(core.save(FfiRecord {
                kind: "patients".into(),
                local_id: 0,
                server_id: None,
                parent_local_id: None,
                parent_server_id: None,
                sync_status: String::new(),
                created_at: String::new(),
                updated_at: String::new(),
                payload_json: patient_json("Radha"),
            }))
            .unwrap();

        assert!(!outcome.synced);
        assert_eq!(outcome.degraded_reason.as_deref(), Some("offline"));
        assert_eq!(core.pending_count().unwrap(), 1);
        assert_eq!(core.list_pending().unwrap()[0].action, "CREATE");
    }

    #[test]
    fn test_bad_config_is_reported() {
        let result = open_sync_core_in_memory(Some("request_timeout_secs = 0".into()));
        assert!(matches!(result, Err(AshaSyncError::ConfigError(_))));
    }
}
