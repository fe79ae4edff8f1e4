//! Record envelope shared by every entity kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChildGrowth, Patient, PregnancyVisit, Vaccination, Visit};

/// The five record kinds mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Visit,
    PregnancyVisit,
    ChildGrowth,
    Vaccination,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Patient,
        EntityKind::Visit,
        EntityKind::PregnancyVisit,
        EntityKind::ChildGrowth,
        EntityKind::Vaccination,
    ];

    /// Local table name; also the stable tag stored in the ledger.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patients",
            EntityKind::Visit => "visits",
            EntityKind::PregnancyVisit => "pregnancy_visits",
            EntityKind::ChildGrowth => "child_growth",
            EntityKind::Vaccination => "vaccinations",
        }
    }

    /// Remote endpoint, relative to the configured base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patients.php",
            EntityKind::Visit => "visits.php",
            EntityKind::PregnancyVisit => "pregnancy_visits.php",
            EntityKind::ChildGrowth => "child_growth.php",
            EntityKind::Vaccination => "vaccinations.php",
        }
    }

    /// Human-readable name, used for derived-state fallback text.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Patient => "Patient",
            EntityKind::Visit => "Visit",
            EntityKind::PregnancyVisit => "Pregnancy Visit",
            EntityKind::ChildGrowth => "Child Growth",
            EntityKind::Vaccination => "Vaccination",
        }
    }

    /// Every kind except patients hangs off a patient.
    pub fn has_parent(&self) -> bool {
        !matches!(self, EntityKind::Patient)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|k| k.table() == wanted || k.label().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

/// Per-record sync flag. A denormalized cache of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Synced => "SYNCED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(SyncStatus::Pending),
            "SYNCED" => Ok(SyncStatus::Synced),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Ledger key: one live entry per `(kind, local_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub local_id: i64,
}

impl RecordKey {
    pub fn new(kind: EntityKind, local_id: i64) -> Self {
        Self { kind, local_id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.local_id)
    }
}

/// Reference from a child record to its patient.
///
/// Either form may be missing: a child created offline only knows the
/// patient's local id, a child fetched from the server before its patient
/// only knows the patient's server id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub local_id: Option<i64>,
    pub server_id: Option<i64>,
}

impl ParentRef {
    pub fn local(local_id: i64) -> Self {
        Self {
            local_id: Some(local_id),
            server_id: None,
        }
    }

    pub fn server(server_id: i64) -> Self {
        Self {
            local_id: None,
            server_id: Some(server_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.local_id.is_none() && self.server_id.is_none()
    }
}

/// Kind-specific record body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RecordPayload {
    Patient(Patient),
    Visit(Visit),
    PregnancyVisit(PregnancyVisit),
    ChildGrowth(ChildGrowth),
    Vaccination(Vaccination),
}

impl RecordPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            RecordPayload::Patient(_) => EntityKind::Patient,
            RecordPayload::Visit(_) => EntityKind::Visit,
            RecordPayload::PregnancyVisit(_) => EntityKind::PregnancyVisit,
            RecordPayload::ChildGrowth(_) => EntityKind::ChildGrowth,
            RecordPayload::Vaccination(_) => EntityKind::Vaccination,
        }
    }

    /// Field map without kind tagging; the shape stored locally and sent remotely.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            RecordPayload::Patient(p) => serde_json::to_value(p),
            RecordPayload::Visit(v) => serde_json::to_value(v),
            RecordPayload::PregnancyVisit(v) => serde_json::to_value(v),
            RecordPayload::ChildGrowth(g) => serde_json::to_value(g),
            RecordPayload::Vaccination(v) => serde_json::to_value(v),
        }
    }

    /// Decode a field map for the given kind. Unknown fields are ignored.
    pub fn from_json(kind: EntityKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Patient => RecordPayload::Patient(serde_json::from_value(value)?),
            EntityKind::Visit => RecordPayload::Visit(serde_json::from_value(value)?),
            EntityKind::PregnancyVisit => {
                RecordPayload::PregnancyVisit(serde_json::from_value(value)?)
            }
            EntityKind::ChildGrowth => RecordPayload::ChildGrowth(serde_json::from_value(value)?),
            EntityKind::Vaccination => RecordPayload::Vaccination(serde_json::from_value(value)?),
        })
    }

    /// Risk implied for the parent patient by this record, if any.
    pub fn risk_signal(&self) -> Option<RiskSignal> {
        match self {
            RecordPayload::PregnancyVisit(v) => v.risk_signal(),
            RecordPayload::ChildGrowth(g) => g.risk_signal(),
            _ => None,
        }
    }

    pub fn as_patient(&self) -> Option<&Patient> {
        match self {
            RecordPayload::Patient(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_patient_mut(&mut self) -> Option<&mut Patient> {
        match self {
            RecordPayload::Patient(p) => Some(p),
            _ => None,
        }
    }
}

/// A child record's contribution to its patient's risk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskSignal {
    /// Kind of the record carrying the signal.
    pub source: EntityKind,
    /// Free-text reason(s), comma separated. `None` when the flag was set without one.
    pub reason: Option<String>,
}

/// A mirrored record with its identity and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-assigned id; 0 until first local persist.
    pub local_id: i64,
    /// Server-assigned id; immutable once bound.
    pub server_id: Option<i64>,
    /// Parent patient (children only)
    pub parent: ParentRef,
    pub sync_status: SyncStatus,
    /// Edit-clock value of the last local edit.
    pub generation: i64,
    pub created_at: String,
    pub updated_at: String,
    pub payload: RecordPayload,
}

impl Record {
    /// A new, not yet persisted record.
    pub fn new(payload: RecordPayload) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            local_id: 0,
            server_id: None,
            parent: ParentRef::default(),
            sync_status: SyncStatus::Pending,
            generation: 0,
            created_at: now.clone(),
            updated_at: now,
            payload,
        }
    }

    /// A new child record attached to `parent`.
    pub fn child_of(payload: RecordPayload, parent: &Record) -> Self {
        let mut record = Self::new(payload);
        record.parent = ParentRef {
            local_id: (parent.local_id > 0).then_some(parent.local_id),
            server_id: parent.server_id,
        };
        record
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind(), self.local_id)
    }

    pub fn is_persisted(&self) -> bool {
        self.local_id > 0
    }

    /// True once the server has assigned an id.
    pub fn is_bound(&self) -> bool {
        self.server_id.map(|id| id > 0).unwrap_or(false)
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
