//! Pending-operation ledger models.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{EntityKind, RecordKey};

/// Remote verb a ledger entry replays as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    Create,
    Update,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::Create => "CREATE",
            LedgerAction::Update => "UPDATE",
        }
    }
}

impl FromStr for LedgerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" | "INSERT" => Ok(LedgerAction::Create),
            "UPDATE" => Ok(LedgerAction::Update),
            other => Err(format!("unknown ledger action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Synced,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDING",
            LedgerStatus::Synced => "SYNCED",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(LedgerStatus::Pending),
            "SYNCED" => Ok(LedgerStatus::Synced),
            other => Err(format!("unknown ledger status: {}", other)),
        }
    }
}

/// A write not yet confirmed by the server (or, once `Synced`, sync history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Enqueue order; FIFO replay key
    #[serde(skip)]
    pub seq: i64,
    pub kind: EntityKind,
    pub local_id: i64,
    pub action: LedgerAction,
    /// Record snapshot at the last enqueue
    pub payload: serde_json::Value,
    pub status: LedgerStatus,
    /// Edit-clock value the snapshot corresponds to
    #[serde(skip)]
    pub generation: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub last_attempt_at: Option<String>,
}

impl LedgerEntry {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind, self.local_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == LedgerStatus::Pending
    }
}
