//! Database layer for the local mirror.

mod schema;
mod records;
mod ledger;
mod state;

pub use schema::*;
#[allow(unused_imports)]
pub use records::*;
#[allow(unused_imports)]
pub use ledger::*;
pub use state::*;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` as one atomic unit. Nests: inner calls become savepoints.
    ///
    /// Every mutation that touches both a record and its ledger entry goes
    /// through here, so the two never diverge on disk.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> DbResult<T>) -> DbResult<T> {
        self.conn.execute_batch("SAVEPOINT asha_unit")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE asha_unit")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO asha_unit; RELEASE asha_unit")
                {
                    warn!(error = %e, rollback_error = %rollback, "Savepoint rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        // Check that tables exist
        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "patients",
            "visits",
            "pregnancy_visits",
            "child_growth",
            "vaccinations",
            "sync_ledger",
            "tombstones",
            "edit_clock",
            "sync_state",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.atomically(|db| {
            db.set_sync_state("last_sync_at", "2024-01-15T10:00:00Z")?;
            Err(DbError::Constraint("forced".into()))
        });
        assert!(result.is_err());

        assert_eq!(db.get_sync_state("last_sync_at").unwrap(), Some(String::new()));
    }

    #[test]
    fn test_failed_rollback_keeps_original_error() {
        let db = Database::open_in_memory().unwrap();

        // Releasing the unit early makes the rollback itself fail
        let result: DbResult<()> = db.atomically(|db| {
            db.conn().execute_batch("RELEASE asha_unit")?;
            Err(DbError::Constraint("forced".into()))
        });
        assert!(matches!(result, Err(DbError::Constraint(_))));

        db.set_sync_state("last_sync_at", "after").unwrap();
        assert_eq!(db.get_sync_state("last_sync_at").unwrap(), Some("after".into()));
    }

    #[test]
    fn test_atomically_nests() {
        let db = Database::open_in_memory().unwrap();

        db.atomically(|db| {
            db.set_sync_state("last_sync_at", "outer")?;
            let inner: DbResult<()> = db.atomically(|db| {
                db.set_sync_state("last_sync_at", "inner")?;
                Err(DbError::Constraint("inner fails".into()))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();

        assert_eq!(db.get_sync_state("last_sync_at").unwrap(), Some("outer".into()));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let db = Database::open(&path).unwrap();
            db.set_sync_state("last_sync_at", "2024-01-15T10:00:00Z").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(
            db.get_sync_state("last_sync_at").unwrap(),
            Some("2024-01-15T10:00:00Z".into())
        );
    }
}
