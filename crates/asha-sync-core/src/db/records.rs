//! Record database operations, shared by all five entity tables.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{
    EntityKind, ParentRef, PatientCategory, Record, RecordPayload, SyncStatus,
};

/// Local list query. Filters that do not apply to a kind are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    /// Children of this patient (either id form matches)
    pub parent: Option<ParentRef>,
    /// Patients only
    pub category: Option<PatientCategory>,
    /// Patients only; case-insensitive
    pub name_prefix: Option<String>,
}

impl ListFilter {
    pub fn children_of(parent: ParentRef) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn category(category: PatientCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }
}

fn columns(kind: EntityKind) -> &'static str {
    if kind.has_parent() {
        "local_id, server_id, parent_local_id, parent_server_id, sync_status, \
         generation, payload, created_at, updated_at"
    } else {
        "local_id, server_id, NULL, NULL, sync_status, \
         generation, payload, created_at, updated_at"
    }
}

impl Database {
    // ========================================================================
    // Edit clock
    // ========================================================================

    /// Advance the edit clock and return the new value.
    pub fn next_generation(&self) -> DbResult<i64> {
        self.conn
            .execute("UPDATE edit_clock SET value = value + 1 WHERE id = 1", [])?;
        self.current_generation()
    }

    /// Read the edit clock without advancing it.
    pub fn current_generation(&self) -> DbResult<i64> {
        self.conn
            .query_row("SELECT value FROM edit_clock WHERE id = 1", [], |row| row.get(0))
            .map_err(Into::into)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Insert a new record and assign its local id.
    pub fn insert_record(&self, record: &mut Record) -> DbResult<i64> {
        let kind = record.kind();
        let payload = serde_json::to_string(&record.payload.to_json()?)?;

        if kind.has_parent() {
            self.conn.execute(
                &format!(
                    r#"
                    INSERT INTO {} (
                        server_id, parent_local_id, parent_server_id, sync_status,
                        generation, payload, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    kind.table()
                ),
                params![
                    record.server_id,
                    record.parent.local_id,
                    record.parent.server_id,
                    record.sync_status.as_str(),
                    record.generation,
                    payload,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
        } else {
            self.conn.execute(
                &format!(
                    r#"
                    INSERT INTO {} (
                        server_id, sync_status, generation, payload, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    kind.table()
                ),
                params![
                    record.server_id,
                    record.sync_status.as_str(),
                    record.generation,
                    payload,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
        }

        record.local_id = self.conn.last_insert_rowid();
        Ok(record.local_id)
    }

    /// Overwrite a record's body and bookkeeping.
    ///
    /// A bound server id is never replaced; only a missing one is filled in.
    pub fn update_record(&self, record: &Record) -> DbResult<bool> {
        let kind = record.kind();
        let payload = serde_json::to_string(&record.payload.to_json()?)?;

        let rows_affected = if kind.has_parent() {
            self.conn.execute(
                &format!(
                    r#"
                    UPDATE {} SET
                        server_id = COALESCE(server_id, ?2),
                        parent_local_id = ?3,
                        parent_server_id = ?4,
                        sync_status = ?5,
                        generation = ?6,
                        payload = ?7,
                        updated_at = ?8
                    WHERE local_id = ?1
                    "#,
                    kind.table()
                ),
                params![
                    record.local_id,
                    record.server_id,
                    record.parent.local_id,
                    record.parent.server_id,
                    record.sync_status.as_str(),
                    record.generation,
                    payload,
                    record.updated_at,
                ],
            )?
        } else {
            self.conn.execute(
                &format!(
                    r#"
                    UPDATE {} SET
                        server_id = COALESCE(server_id, ?2),
                        sync_status = ?3,
                        generation = ?4,
                        payload = ?5,
                        updated_at = ?6
                    WHERE local_id = ?1
                    "#,
                    kind.table()
                ),
                params![
                    record.local_id,
                    record.server_id,
                    record.sync_status.as_str(),
                    record.generation,
                    payload,
                    record.updated_at,
                ],
            )?
        };
        Ok(rows_affected > 0)
    }

    /// Get a record by local ID.
    pub fn get_record(&self, kind: EntityKind, local_id: i64) -> DbResult<Option<Record>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE local_id = ?",
                    columns(kind),
                    kind.table()
                ),
                [local_id],
                |row| RecordRow::read(kind, row),
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get a record by server ID.
    pub fn get_record_by_server_id(
        &self,
        kind: EntityKind,
        server_id: i64,
    ) -> DbResult<Option<Record>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE server_id = ?",
                    columns(kind),
                    kind.table()
                ),
                [server_id],
                |row| RecordRow::read(kind, row),
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List every record of a kind.
    pub fn list_records(&self, kind: EntityKind) -> DbResult<Vec<Record>> {
        self.list_records_filtered(kind, &ListFilter::default())
    }

    /// List records of a kind matching `filter`.
    ///
    /// Patients are ordered by name, children by local id.
    pub fn list_records_filtered(
        &self,
        kind: EntityKind,
        filter: &ListFilter,
    ) -> DbResult<Vec<Record>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if kind.has_parent() {
            if let Some(parent) = filter.parent {
                match (parent.local_id, parent.server_id) {
                    (Some(local), Some(server)) => {
                        clauses.push("(parent_local_id = ? OR parent_server_id = ?)");
                        values.push(SqlValue::Integer(local));
                        values.push(SqlValue::Integer(server));
                    }
                    (Some(local), None) => {
                        clauses.push("parent_local_id = ?");
                        values.push(SqlValue::Integer(local));
                    }
                    (None, Some(server)) => {
                        clauses.push("parent_server_id = ?");
                        values.push(SqlValue::Integer(server));
                    }
                    (None, None) => {}
                }
            }
        } else {
            if let Some(category) = filter.category {
                clauses.push("json_extract(payload, '$.category') = ?");
                values.push(SqlValue::Text(category.as_str().to_string()));
            }
            if let Some(prefix) = filter.name_prefix.as_deref().filter(|p| !p.is_empty()) {
                clauses.push("json_extract(payload, '$.name') LIKE ? ESCAPE '\\'");
                values.push(SqlValue::Text(format!("{}%", escape_like(prefix))));
            }
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order = if kind.has_parent() {
            "local_id"
        } else {
            "json_extract(payload, '$.name') COLLATE NOCASE, local_id"
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} {} ORDER BY {}",
            columns(kind),
            kind.table(),
            where_clause,
            order
        ))?;

        let rows = stmt.query_map(params_from_iter(values), |row| RecordRow::read(kind, row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// List records of a kind in a given sync state.
    pub fn list_records_by_status(
        &self,
        kind: EntityKind,
        status: SyncStatus,
    ) -> DbResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE sync_status = ? ORDER BY local_id",
            columns(kind),
            kind.table()
        ))?;

        let rows = stmt.query_map([status.as_str()], |row| RecordRow::read(kind, row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Delete a record.
    pub fn delete_record(&self, kind: EntityKind, local_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            &format!("DELETE FROM {} WHERE local_id = ?", kind.table()),
            [local_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Bind a server id to a record that has none. Returns false when the
    /// record already had one (or does not exist); the caller decides whether
    /// that is a repeat or a conflict.
    pub fn bind_server_id(&self, kind: EntityKind, local_id: i64, server_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            &format!(
                "UPDATE {} SET server_id = ?2 WHERE local_id = ?1 AND server_id IS NULL",
                kind.table()
            ),
            params![local_id, server_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Set the per-record sync flag.
    pub fn set_sync_status(
        &self,
        kind: EntityKind,
        local_id: i64,
        status: SyncStatus,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            &format!(
                "UPDATE {} SET sync_status = ?2 WHERE local_id = ?1",
                kind.table()
            ),
            params![local_id, status.as_str()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Count records of a kind in a given sync state.
    pub fn count_by_status(&self, kind: EntityKind, status: SyncStatus) -> DbResult<u32> {
        self.conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE sync_status = ?",
                    kind.table()
                ),
                [status.as_str()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Local id of the record bound to `server_id`, if any.
    pub fn local_id_for_server_id(&self, kind: EntityKind, server_id: i64) -> DbResult<Option<i64>> {
        self.conn
            .query_row(
                &format!("SELECT local_id FROM {} WHERE server_id = ?", kind.table()),
                [server_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// The server id of the patient `parent` points at, if known.
    ///
    /// The local row wins over the cached server id on the reference, since
    /// the cache is only filled in when the child was created.
    pub fn resolve_parent_server_id(&self, parent: &ParentRef) -> DbResult<Option<i64>> {
        if let Some(local_id) = parent.local_id {
            let bound: Option<Option<i64>> = self
                .conn
                .query_row(
                    "SELECT server_id FROM patients WHERE local_id = ?",
                    [local_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(Some(server_id)) = bound {
                return Ok(Some(server_id));
            }
        }
        Ok(parent.server_id)
    }

    /// Copy a newly bound patient server id onto every child that only knew
    /// the patient's local id.
    pub fn propagate_parent_server_id(&self, patient_local_id: i64, server_id: i64) -> DbResult<usize> {
        let mut updated = 0;
        for kind in EntityKind::ALL.into_iter().filter(|k| k.has_parent()) {
            updated += self.conn.execute(
                &format!(
                    "UPDATE {} SET parent_server_id = ?2 \
                     WHERE parent_local_id = ?1 AND parent_server_id IS NULL",
                    kind.table()
                ),
                params![patient_local_id, server_id],
            )?;
        }
        Ok(updated)
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Intermediate row struct for database mapping.
struct RecordRow {
    kind: EntityKind,
    local_id: i64,
    server_id: Option<i64>,
    parent_local_id: Option<i64>,
    parent_server_id: Option<i64>,
    sync_status: String,
    generation: i64,
    payload: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn read(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecordRow {
            kind,
            local_id: row.get(0)?,
            server_id: row.get(1)?,
            parent_local_id: row.get(2)?,
            parent_server_id: row.get(3)?,
            sync_status: row.get(4)?,
            generation: row.get(5)?,
            payload: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let fields: serde_json::Value = serde_json::from_str(&row.payload)?;
        let payload = RecordPayload::from_json(row.kind, fields)?;
        let sync_status = row
            .sync_status
            .parse::<SyncStatus>()
            .map_err(|e| DbError::Corrupt(format!("{} #{}: {}", row.kind, row.local_id, e)))?;

        Ok(Record {
            local_id: row.local_id,
            server_id: row.server_id,
            parent: ParentRef {
                local_id: row.parent_local_id,
                server_id: row.parent_server_id,
            },
            sync_status,
            generation: row.generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Patient, PregnancyVisit, Visit};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn insert_patient(db: &Database, name: &str, category: PatientCategory) -> Record {
        let mut record = Record::new(RecordPayload::Patient(
            Patient::new(name.into()).with_category(category),
        ));
        db.insert_record(&mut record).unwrap();
        record
    }

    #[test]
    fn test_edit_clock_is_monotonic() {
        let db = setup_db();
        assert_eq!(db.current_generation().unwrap(), 0);
        assert_eq!(db.next_generation().unwrap(), 1);
        assert_eq!(db.next_generation().unwrap(), 2);
        assert_eq!(db.current_generation().unwrap(), 2);
    }

    #[test]
    fn test_insert_and_get_record() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::PregnantWoman);
        assert!(patient.local_id > 0);

        let retrieved = db.get_record(EntityKind::Patient, patient.local_id).unwrap().unwrap();
        assert_eq!(retrieved.payload, patient.payload);
        assert_eq!(retrieved.sync_status, SyncStatus::Pending);
        assert_eq!(retrieved.server_id, None);
        assert!(retrieved.parent.is_empty());
    }

    #[test]
    fn test_child_keeps_parent_reference() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::PregnantWoman);

        let mut visit = Record::child_of(
            RecordPayload::PregnancyVisit(PregnancyVisit::default()),
            &patient,
        );
        db.insert_record(&mut visit).unwrap();

        let retrieved = db
            .get_record(EntityKind::PregnancyVisit, visit.local_id)
            .unwrap()
            .unwrap();
        assert_eq!(retrieved.parent, ParentRef::local(patient.local_id));
    }

    #[test]
    fn test_update_never_replaces_bound_server_id() {
        let db = setup_db();
        let mut patient = insert_patient(&db, "Radha", PatientCategory::General);
        assert!(db.bind_server_id(EntityKind::Patient, patient.local_id, 42).unwrap());

        patient.server_id = Some(99);
        db.update_record(&patient).unwrap();

        let retrieved = db.get_record(EntityKind::Patient, patient.local_id).unwrap().unwrap();
        assert_eq!(retrieved.server_id, Some(42));
        assert!(!db.bind_server_id(EntityKind::Patient, patient.local_id, 43).unwrap());
    }

    #[test]
    fn test_get_by_server_id() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::General);
        db.bind_server_id(EntityKind::Patient, patient.local_id, 42).unwrap();

        let found = db.get_record_by_server_id(EntityKind::Patient, 42).unwrap().unwrap();
        assert_eq!(found.local_id, patient.local_id);
        assert_eq!(
            db.local_id_for_server_id(EntityKind::Patient, 42).unwrap(),
            Some(patient.local_id)
        );
        assert!(db.get_record_by_server_id(EntityKind::Visit, 42).unwrap().is_none());
    }

    #[test]
    fn test_filter_by_category_and_name() {
        let db = setup_db();
        insert_patient(&db, "Radha", PatientCategory::PregnantWoman);
        insert_patient(&db, "rani", PatientCategory::PregnantWoman);
        insert_patient(&db, "Arjun", PatientCategory::Child);

        let pregnant = db
            .list_records_filtered(
                EntityKind::Patient,
                &ListFilter::category(PatientCategory::PregnantWoman),
            )
            .unwrap();
        assert_eq!(pregnant.len(), 2);

        let filter = ListFilter {
            name_prefix: Some("ra".into()),
            ..ListFilter::default()
        };
        let names: Vec<String> = db
            .list_records_filtered(EntityKind::Patient, &filter)
            .unwrap()
            .into_iter()
            .filter_map(|r| r.payload.as_patient().map(|p| p.name.clone()))
            .collect();
        assert_eq!(names, vec!["Radha".to_string(), "rani".to_string()]);

        // Sorted by name, case-insensitive
        let all = db.list_records(EntityKind::Patient).unwrap();
        assert_eq!(all[0].payload.as_patient().unwrap().name, "Arjun");
    }

    #[test]
    fn test_name_prefix_is_literal() {
        let db = setup_db();
        insert_patient(&db, "R_dha", PatientCategory::General);
        insert_patient(&db, "Radha", PatientCategory::General);

        let filter = ListFilter {
            name_prefix: Some("R_".into()),
            ..ListFilter::default()
        };
        let found = db.list_records_filtered(EntityKind::Patient, &filter).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_filter_children_by_either_parent_id() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::General);

        let mut offline = Record::child_of(RecordPayload::Visit(Visit::default()), &patient);
        db.insert_record(&mut offline).unwrap();

        let mut fetched = Record::new(RecordPayload::Visit(Visit::default()));
        fetched.parent = ParentRef::server(42);
        db.insert_record(&mut fetched).unwrap();

        let by_local = db
            .list_records_filtered(
                EntityKind::Visit,
                &ListFilter::children_of(ParentRef::local(patient.local_id)),
            )
            .unwrap();
        assert_eq!(by_local.len(), 1);

        let both = ParentRef {
            local_id: Some(patient.local_id),
            server_id: Some(42),
        };
        let by_either = db
            .list_records_filtered(EntityKind::Visit, &ListFilter::children_of(both))
            .unwrap();
        assert_eq!(by_either.len(), 2);
    }

    #[test]
    fn test_resolve_parent_prefers_local_row() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::General);
        let reference = ParentRef::local(patient.local_id);

        assert_eq!(db.resolve_parent_server_id(&reference).unwrap(), None);

        db.bind_server_id(EntityKind::Patient, patient.local_id, 42).unwrap();
        assert_eq!(db.resolve_parent_server_id(&reference).unwrap(), Some(42));
        assert_eq!(
            db.resolve_parent_server_id(&ParentRef::server(7)).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn test_propagate_parent_server_id() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::General);
        let mut visit = Record::child_of(RecordPayload::Visit(Visit::default()), &patient);
        db.insert_record(&mut visit).unwrap();

        assert_eq!(db.propagate_parent_server_id(patient.local_id, 42).unwrap(), 1);

        let retrieved = db.get_record(EntityKind::Visit, visit.local_id).unwrap().unwrap();
        assert_eq!(retrieved.parent.server_id, Some(42));
    }

    #[test]
    fn test_status_and_delete() {
        let db = setup_db();
        let patient = insert_patient(&db, "Radha", PatientCategory::General);

        assert_eq!(db.count_by_status(EntityKind::Patient, SyncStatus::Pending).unwrap(), 1);

        // Synced requires a server id
        assert!(db
            .set_sync_status(EntityKind::Patient, patient.local_id, SyncStatus::Synced)
            .is_err());
        db.bind_server_id(EntityKind::Patient, patient.local_id, 42).unwrap();
        db.set_sync_status(EntityKind::Patient, patient.local_id, SyncStatus::Synced)
            .unwrap();
        assert_eq!(
            db.list_records_by_status(EntityKind::Patient, SyncStatus::Synced)
                .unwrap()
                .len(),
            1
        );

        assert!(db.delete_record(EntityKind::Patient, patient.local_id).unwrap());
        assert!(!db.delete_record(EntityKind::Patient, patient.local_id).unwrap());
    }
}
