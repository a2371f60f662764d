use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
    ",
    )?;
    let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    rowid INTEGER PRIMARY KEY,
    table_name TEXT NOT NULL,
    record_key BLOB,
    payload BLOB NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    written_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    UNIQUE (table_name, record_key)
);
CREATE INDEX IF NOT EXISTS idx_records_live ON records (table_name, rowid) WHERE is_deleted = 0;

CREATE TABLE IF NOT EXISTS audit_log (
    rowid INTEGER PRIMARY KEY,
    audit_id BLOB NOT NULL UNIQUE CHECK (length(audit_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    table_name TEXT NOT NULL,
    record_key BLOB NOT NULL,
    operation TEXT NOT NULL,
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    recorded_at BLOB NOT NULL CHECK (length(recorded_at) = 12),
    payload BLOB NOT NULL,
    checksum BLOB NOT NULL CHECK (length(checksum) = 32)
);
CREATE INDEX IF NOT EXISTS idx_audit_correlation ON audit_log (correlation_id);
CREATE INDEX IF NOT EXISTS idx_audit_record ON audit_log (table_name, record_key);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
";
