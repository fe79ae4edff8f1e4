//! Error taxonomy.
//!
//! Only local-store failures and caller mistakes are hard errors. Everything
//! that originates on the network side is folded into a degraded outcome by
//! the sync engine, classified with [`ErrorCategory`].

use thiserror::Error;

use crate::db::DbError;
use crate::models::RecordKey;

/// How a remote failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Offline or unreachable. Recovered by local fallback.
    Connectivity,
    /// The server understood and refused the write. Surfaced as a message;
    /// the record stays pending.
    RemoteRejection,
    /// Timeout, 5xx or an unreadable response. Retried on the next pass.
    TransientServer,
}

/// Hard failures returned by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Local store error: {0}")]
    Store(#[from] DbError),

    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl EngineError {
    /// Mutex poisoning is treated as a store failure.
    pub fn poisoned() -> Self {
        EngineError::Store(DbError::Poisoned)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
