//! SQLite schema definition.

/// Complete database schema for the local mirror.
///
/// Entity tables share one column layout: identity, sync bookkeeping and a
/// JSON payload. Child tables add both forms of the parent reference; there is
/// no foreign key because a child fetched from the server may arrive before
/// its patient does.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER UNIQUE,                    -- NULL until first sync
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL DEFAULT 0,       -- edit clock at last local edit
    payload TEXT NOT NULL,                       -- JSON object
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (sync_status = 'PENDING' OR server_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_patients_sync ON patients(sync_status);

-- ============================================================================
-- Child records
-- ============================================================================

CREATE TABLE IF NOT EXISTS visits (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER UNIQUE,
    parent_local_id INTEGER,
    parent_server_id INTEGER,
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (sync_status = 'PENDING' OR server_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_visits_parent_local ON visits(parent_local_id);
CREATE INDEX IF NOT EXISTS idx_visits_parent_server ON visits(parent_server_id);

CREATE TABLE IF NOT EXISTS pregnancy_visits (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER UNIQUE,
    parent_local_id INTEGER,
    parent_server_id INTEGER,
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (sync_status = 'PENDING' OR server_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_pregnancy_visits_parent_local ON pregnancy_visits(parent_local_id);
CREATE INDEX IF NOT EXISTS idx_pregnancy_visits_parent_server ON pregnancy_visits(parent_server_id);

CREATE TABLE IF NOT EXISTS child_growth (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER UNIQUE,
    parent_local_id INTEGER,
    parent_server_id INTEGER,
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (sync_status = 'PENDING' OR server_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_child_growth_parent_local ON child_growth(parent_local_id);
CREATE INDEX IF NOT EXISTS idx_child_growth_parent_server ON child_growth(parent_server_id);

CREATE TABLE IF NOT EXISTS vaccinations (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER UNIQUE,
    parent_local_id INTEGER,
    parent_server_id INTEGER,
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (sync_status = 'PENDING' OR server_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_vaccinations_parent_local ON vaccinations(parent_local_id);
CREATE INDEX IF NOT EXISTS idx_vaccinations_parent_server ON vaccinations(parent_server_id);

-- ============================================================================
-- Pending Operation Ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_ledger (
    kind TEXT NOT NULL,                          -- entity table name
    local_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,                        -- FIFO replay order
    action TEXT NOT NULL CHECK (action IN ('CREATE', 'UPDATE')),
    payload TEXT NOT NULL,                       -- JSON snapshot at last enqueue
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'SYNCED')),
    generation INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    last_attempt_at TEXT,
    PRIMARY KEY (kind, local_id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_status_seq ON sync_ledger(status, seq);

-- ============================================================================
-- Tombstones (local deletes whose remote delete is still owed)
-- ============================================================================

CREATE TABLE IF NOT EXISTS tombstones (
    kind TEXT NOT NULL,
    server_id INTEGER NOT NULL,
    deleted_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    PRIMARY KEY (kind, server_id)
);

-- ============================================================================
-- Edit Clock (single row, monotonic)
-- ============================================================================

CREATE TABLE IF NOT EXISTS edit_clock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO edit_clock (id, value) VALUES (1, 0);

-- ============================================================================
-- Sync State
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Track last successful sync timestamps
INSERT OR IGNORE INTO sync_state (key, value) VALUES ('last_sync_at', '');
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_synced_requires_server_id() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        // Synced without a server id should fail
        let result = conn.execute(
            "INSERT INTO patients (sync_status, payload) VALUES ('SYNCED', '{}')",
            [],
        );
        assert!(result.is_err());

        // Pending without a server id is the normal offline state
        let result = conn.execute(
            "INSERT INTO patients (sync_status, payload) VALUES ('PENDING', '{}')",
            [],
        );
        assert!(result.is_ok());

        let result = conn.execute(
            "INSERT INTO patients (server_id, sync_status, payload) VALUES (42, 'SYNCED', '{}')",
            [],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_server_id_unique_per_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO visits (server_id, sync_status, payload) VALUES (7, 'SYNCED', '{}')",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO visits (server_id, sync_status, payload) VALUES (7, 'SYNCED', '{}')",
            [],
        );
        assert!(duplicate.is_err());

        // Same server id in another kind's table is fine
        let other_kind = conn.execute(
            "INSERT INTO vaccinations (server_id, sync_status, payload) VALUES (7, 'SYNCED', '{}')",
            [],
        );
        assert!(other_kind.is_ok());
    }

    #[test]
    fn test_ledger_rejects_unknown_action() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let result = conn.execute(
            "INSERT INTO sync_ledger (kind, local_id, seq, action, payload, generation, created_at)
             VALUES ('patients', 1, 1, 'DELETE', '{}', 1, '2024-01-15T10:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
