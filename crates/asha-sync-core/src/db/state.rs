//! Sync bookkeeping: key/value state and delete tombstones.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::EntityKind;

/// A local delete whose remote counterpart is still owed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub kind: EntityKind,
    pub server_id: i64,
    pub deleted_at: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Database {
    /// Get sync state value.
    pub fn get_sync_state(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set sync state value.
    pub fn set_sync_state(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?, ?, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    /// Record that `server_id` was deleted locally. Re-adding is a no-op.
    pub fn add_tombstone(&self, kind: EntityKind, server_id: i64) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tombstones (kind, server_id, deleted_at) VALUES (?, ?, ?)",
            params![kind.table(), server_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// List outstanding tombstones, oldest first.
    pub fn list_tombstones(&self) -> DbResult<Vec<Tombstone>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT kind, server_id, deleted_at, retry_count, last_error
            FROM tombstones
            ORDER BY deleted_at, kind, server_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut tombstones = Vec::new();
        for row in rows {
            let (kind, server_id, deleted_at, retry_count, last_error) = row?;
            tombstones.push(Tombstone {
                kind: kind.parse().map_err(DbError::Corrupt)?,
                server_id,
                deleted_at,
                retry_count,
                last_error,
            });
        }
        Ok(tombstones)
    }

    /// Whether a server id has been deleted locally.
    pub fn is_tombstoned(&self, kind: EntityKind, server_id: i64) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tombstones WHERE kind = ? AND server_id = ?",
            params![kind.table(), server_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remove a tombstone once the server has confirmed the delete.
    pub fn remove_tombstone(&self, kind: EntityKind, server_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM tombstones WHERE kind = ? AND server_id = ?",
            params![kind.table(), server_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Record a failed remote delete.
    pub fn record_tombstone_failure(
        &self,
        kind: EntityKind,
        server_id: i64,
        error: &str,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE tombstones SET retry_count = retry_count + 1, last_error = ?3
            WHERE kind = ?1 AND server_id = ?2
            "#,
            params![kind.table(), server_id, error],
        )?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_sync_state() {
        let db = setup_db();

        // Default values from schema
        let last_sync = db.get_sync_state("last_sync_at").unwrap();
        assert_eq!(last_sync, Some("".to_string()));
        assert_eq!(db.get_sync_state("last_fetch_at:patients").unwrap(), None);

        // Update
        db.set_sync_state("last_sync_at", "2024-01-15T10:00:00Z")
            .unwrap();
        let last_sync = db.get_sync_state("last_sync_at").unwrap();
        assert_eq!(last_sync, Some("2024-01-15T10:00:00Z".to_string()));
    }

    #[test]
    fn test_tombstone_lifecycle() {
        let db = setup_db();

        db.add_tombstone(EntityKind::Visit, 42).unwrap();
        db.add_tombstone(EntityKind::Visit, 42).unwrap();
        assert!(db.is_tombstoned(EntityKind::Visit, 42).unwrap());
        assert!(!db.is_tombstoned(EntityKind::Patient, 42).unwrap());

        db.record_tombstone_failure(EntityKind::Visit, 42, "HTTP 503")
            .unwrap();
        let tombstones = db.list_tombstones().unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].kind, EntityKind::Visit);
        assert_eq!(tombstones[0].retry_count, 1);
        assert_eq!(tombstones[0].last_error.as_deref(), Some("HTTP 503"));

        assert!(db.remove_tombstone(EntityKind::Visit, 42).unwrap());
        assert!(!db.is_tombstoned(EntityKind::Visit, 42).unwrap());
        assert!(db.list_tombstones().unwrap().is_empty());
    }
}
