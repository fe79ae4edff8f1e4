//! Pending-operation ledger database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{EntityKind, LedgerAction, LedgerEntry, LedgerStatus};

const LEDGER_COLUMNS: &str = "seq, kind, local_id, action, payload, status, generation, \
                              retry_count, last_error, created_at, last_attempt_at";

impl Database {
    /// Insert or refresh the entry for `(kind, local_id)`.
    ///
    /// Re-enqueueing a still-pending entry keeps its queue position and
    /// failure history; re-enqueueing a synced one starts it afresh at the
    /// back of the queue.
    pub fn upsert_ledger_entry(
        &self,
        kind: EntityKind,
        local_id: i64,
        action: LedgerAction,
        payload: &serde_json::Value,
        generation: i64,
    ) -> DbResult<()> {
        let payload = serde_json::to_string(payload)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.conn.execute(
            r#"
            INSERT INTO sync_ledger (
                kind, local_id, seq, action, payload, status, generation,
                retry_count, last_error, created_at, last_attempt_at
            ) VALUES (
                ?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_ledger),
                ?3, ?4, 'PENDING', ?5, 0, NULL, ?6, NULL
            )
            ON CONFLICT(kind, local_id) DO UPDATE SET
                seq = CASE WHEN sync_ledger.status = 'PENDING'
                           THEN sync_ledger.seq ELSE excluded.seq END,
                retry_count = CASE WHEN sync_ledger.status = 'PENDING'
                                   THEN sync_ledger.retry_count ELSE 0 END,
                last_error = CASE WHEN sync_ledger.status = 'PENDING'
                                  THEN sync_ledger.last_error ELSE NULL END,
                created_at = CASE WHEN sync_ledger.status = 'PENDING'
                                  THEN sync_ledger.created_at ELSE excluded.created_at END,
                last_attempt_at = CASE WHEN sync_ledger.status = 'PENDING'
                                       THEN sync_ledger.last_attempt_at ELSE NULL END,
                action = excluded.action,
                payload = excluded.payload,
                generation = excluded.generation,
                status = 'PENDING'
            "#,
            params![kind.table(), local_id, action.as_str(), payload, generation, now],
        )?;
        Ok(())
    }

    /// Get the entry for a record.
    pub fn get_ledger_entry(
        &self,
        kind: EntityKind,
        local_id: i64,
    ) -> DbResult<Option<LedgerEntry>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_ledger WHERE kind = ? AND local_id = ?",
                    LEDGER_COLUMNS
                ),
                params![kind.table(), local_id],
                LedgerRow::read,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List entries in FIFO order, optionally restricted to one status.
    pub fn list_ledger(&self, status: Option<LedgerStatus>) -> DbResult<Vec<LedgerEntry>> {
        let rows = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM sync_ledger WHERE status = ? ORDER BY seq",
                    LEDGER_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([status.as_str()], LedgerRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM sync_ledger ORDER BY seq",
                    LEDGER_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], LedgerRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    /// Set an entry's status. Marking synced also stamps the attempt time.
    pub fn set_ledger_status(
        &self,
        kind: EntityKind,
        local_id: i64,
        status: LedgerStatus,
    ) -> DbResult<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let rows_affected = self.conn.execute(
            r#"
            UPDATE sync_ledger SET
                status = ?3,
                last_error = CASE WHEN ?3 = 'SYNCED' THEN NULL ELSE last_error END,
                last_attempt_at = ?4
            WHERE kind = ?1 AND local_id = ?2
            "#,
            params![kind.table(), local_id, status.as_str(), now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Record a failed push attempt. The entry stays pending.
    pub fn record_ledger_failure(
        &self,
        kind: EntityKind,
        local_id: i64,
        error: &str,
    ) -> DbResult<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let rows_affected = self.conn.execute(
            r#"
            UPDATE sync_ledger SET
                retry_count = retry_count + 1,
                last_error = ?3,
                last_attempt_at = ?4
            WHERE kind = ?1 AND local_id = ?2
            "#,
            params![kind.table(), local_id, error, now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Remove an entry.
    pub fn delete_ledger_entry(&self, kind: EntityKind, local_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM sync_ledger WHERE kind = ? AND local_id = ?",
            params![kind.table(), local_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Count entries with a given status.
    pub fn count_ledger(&self, status: LedgerStatus) -> DbResult<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sync_ledger WHERE status = ?",
                [status.as_str()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Delete synced entries last touched before `older_than` (RFC 3339).
    pub fn purge_ledger(&self, older_than: &str) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            DELETE FROM sync_ledger
            WHERE status = 'SYNCED'
              AND COALESCE(last_attempt_at, created_at) < ?
            "#,
            [older_than],
        )?;
        Ok(rows_affected)
    }
}

/// Intermediate row struct for database mapping.
struct LedgerRow {
    seq: i64,
    kind: String,
    local_id: i64,
    action: String,
    payload: String,
    status: String,
    generation: i64,
    retry_count: u32,
    last_error: Option<String>,
    created_at: String,
    last_attempt_at: Option<String>,
}

impl LedgerRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(LedgerRow {
            seq: row.get(0)?,
            kind: row.get(1)?,
            local_id: row.get(2)?,
            action: row.get(3)?,
            payload: row.get(4)?,
            status: row.get(5)?,
            generation: row.get(6)?,
            retry_count: row.get(7)?,
            last_error: row.get(8)?,
            created_at: row.get(9)?,
            last_attempt_at: row.get(10)?,
        })
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DbError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse::<EntityKind>().map_err(DbError::Corrupt)?;
        let action = row.action.parse::<LedgerAction>().map_err(DbError::Corrupt)?;
        let status = row.status.parse::<LedgerStatus>().map_err(DbError::Corrupt)?;

        Ok(LedgerEntry {
            seq: row.seq,
            kind,
            local_id: row.local_id,
            action,
            payload: serde_json::from_str(&row.payload)?,
            status,
            generation: row.generation,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_at: row.created_at,
            last_attempt_at: row.last_attempt_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup_db();
        db.upsert_ledger_entry(
            EntityKind::Patient,
            1,
            LedgerAction::Create,
            &json!({"name": "Radha"}),
            1,
        )
        .unwrap();

        let entry = db.get_ledger_entry(EntityKind::Patient, 1).unwrap().unwrap();
        assert_eq!(entry.action, LedgerAction::Create);
        assert_eq!(entry.status, LedgerStatus::Pending);
        assert_eq!(entry.payload["name"], "Radha");
        assert_eq!(entry.generation, 1);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn test_fifo_order() {
        let db = setup_db();
        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Create, &json!({}), 1)
            .unwrap();
        db.upsert_ledger_entry(EntityKind::Visit, 1, LedgerAction::Create, &json!({}), 2)
            .unwrap();
        db.upsert_ledger_entry(EntityKind::Patient, 2, LedgerAction::Create, &json!({}), 3)
            .unwrap();

        let keys: Vec<(EntityKind, i64)> = db
            .list_ledger(Some(LedgerStatus::Pending))
            .unwrap()
            .into_iter()
            .map(|e| (e.kind, e.local_id))
            .collect();
        assert_eq!(
            keys,
            vec![
                (EntityKind::Patient, 1),
                (EntityKind::Visit, 1),
                (EntityKind::Patient, 2)
            ]
        );
    }

    #[test]
    fn test_pending_upsert_keeps_position_and_history() {
        let db = setup_db();
        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Create, &json!({"v": 1}), 1)
            .unwrap();
        db.upsert_ledger_entry(EntityKind::Patient, 2, LedgerAction::Create, &json!({}), 2)
            .unwrap();
        db.record_ledger_failure(EntityKind::Patient, 1, "timeout").unwrap();

        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Create, &json!({"v": 2}), 3)
            .unwrap();

        let pending = db.list_ledger(Some(LedgerStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].local_id, 1);
        assert_eq!(pending[0].payload["v"], 2);
        assert_eq!(pending[0].generation, 3);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_synced_upsert_moves_to_back() {
        let db = setup_db();
        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Create, &json!({}), 1)
            .unwrap();
        db.upsert_ledger_entry(EntityKind::Patient, 2, LedgerAction::Create, &json!({}), 2)
            .unwrap();
        db.set_ledger_status(EntityKind::Patient, 1, LedgerStatus::Synced)
            .unwrap();

        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Update, &json!({}), 3)
            .unwrap();

        let pending = db.list_ledger(Some(LedgerStatus::Pending)).unwrap();
        assert_eq!(pending[0].local_id, 2);
        assert_eq!(pending[1].local_id, 1);
        assert_eq!(pending[1].action, LedgerAction::Update);
        assert_eq!(pending[1].retry_count, 0);
    }

    #[test]
    fn test_failure_bookkeeping() {
        let db = setup_db();
        db.upsert_ledger_entry(EntityKind::Vaccination, 5, LedgerAction::Update, &json!({}), 1)
            .unwrap();

        db.record_ledger_failure(EntityKind::Vaccination, 5, "HTTP 503").unwrap();
        db.record_ledger_failure(EntityKind::Vaccination, 5, "timeout").unwrap();

        let entry = db.get_ledger_entry(EntityKind::Vaccination, 5).unwrap().unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
        assert!(entry.last_attempt_at.is_some());
        assert!(entry.is_pending());
    }

    #[test]
    fn test_counts_delete_and_purge() {
        let db = setup_db();
        db.upsert_ledger_entry(EntityKind::Patient, 1, LedgerAction::Create, &json!({}), 1)
            .unwrap();
        db.upsert_ledger_entry(EntityKind::Patient, 2, LedgerAction::Create, &json!({}), 2)
            .unwrap();
        db.set_ledger_status(EntityKind::Patient, 1, LedgerStatus::Synced)
            .unwrap();

        assert_eq!(db.count_ledger(LedgerStatus::Pending).unwrap(), 1);
        assert_eq!(db.count_ledger(LedgerStatus::Synced).unwrap(), 1);

        // Nothing is older than the epoch
        assert_eq!(db.purge_ledger("1970-01-01T00:00:00+00:00").unwrap(), 0);
        // Pending entries are never purged
        assert_eq!(db.purge_ledger("9999-01-01T00:00:00+00:00").unwrap(), 1);
        assert_eq!(db.list_ledger(None).unwrap().len(), 1);

        assert!(db.delete_ledger_entry(EntityKind::Patient, 2).unwrap());
        assert!(db.get_ledger_entry(EntityKind::Patient, 2).unwrap().is_none());
    }
}
