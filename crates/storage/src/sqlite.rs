use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use writetrail_core::{
    field_value::{columns_from_msgpack, columns_to_msgpack},
    AuditRecord, Columns, CoreError, CorrelationId, FieldValue,
};

use crate::cancel::CancelSignal;
use crate::error::StorageError;
use crate::traits::{BatchOutcome, GeneratedKey, RowOp, RowWrite, Storage, StoredRow, WriteBatch};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn encode_columns(columns: &Columns) -> Result<Vec<u8>, StorageError> {
    columns_to_msgpack(columns).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_columns(bytes: &[u8]) -> Result<Columns, StorageError> {
    columns_from_msgpack(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Encode a fully-known key; a missing key value is a caller bug.
fn encode_key(table: &str, keys: &Columns) -> Result<Vec<u8>, StorageError> {
    if let Some((column, _)) = keys.iter().find(|(_, v)| v.is_null()) {
        return Err(StorageError::Core(CoreError::UnresolvedKey {
            table: table.to_string(),
            column: column.clone(),
        }));
    }
    if keys.is_empty() {
        return Err(StorageError::Core(CoreError::UnresolvedKey {
            table: table.to_string(),
            column: "<no key>".to_string(),
        }));
    }
    encode_columns(keys)
}

fn describe_key(keys: &Columns) -> String {
    keys.iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn write_row(
    tx: &Connection,
    index: usize,
    row: &RowWrite,
    generated: &mut Vec<GeneratedKey>,
) -> Result<(), StorageError> {
    match row.op {
        RowOp::Insert => {
            if let Some(column) = &row.generated_key {
                tx.execute(
                    "INSERT INTO records (table_name, record_key, payload, is_deleted) VALUES (?1, NULL, ?2, ?3)",
                    rusqlite::params![row.table, encode_columns(&row.values)?, row.soft_deleted],
                )?;
                let rowid = tx.last_insert_rowid();
                let value = FieldValue::Integer(rowid);
                let mut keys = row.keys.clone();
                keys.insert(column.clone(), value.clone());
                let mut values = row.values.clone();
                values.insert(column.clone(), value.clone());
                tx.execute(
                    "UPDATE records SET record_key = ?1, payload = ?2 WHERE rowid = ?3",
                    rusqlite::params![
                        encode_key(&row.table, &keys)?,
                        encode_columns(&values)?,
                        rowid,
                    ],
                )?;
                generated.push(GeneratedKey {
                    row_index: index,
                    column: column.clone(),
                    value,
                });
                return Ok(());
            }

            let result = tx.execute(
                "INSERT INTO records (table_name, record_key, payload, is_deleted) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    row.table,
                    encode_key(&row.table, &row.keys)?,
                    encode_columns(&row.values)?,
                    row.soft_deleted,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StorageError::KeyCollision {
                        table: row.table.clone(),
                        key: describe_key(&row.keys),
                    })
                }
                Err(e) => Err(StorageError::Sqlite(e)),
            }
        }

        RowOp::Update => {
            let n = tx.execute(
                "UPDATE records SET payload = ?1, is_deleted = ?2 WHERE table_name = ?3 AND record_key = ?4",
                rusqlite::params![
                    encode_columns(&row.values)?,
                    row.soft_deleted,
                    row.table,
                    encode_key(&row.table, &row.keys)?,
                ],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound(format!(
                    "{}[{}]",
                    row.table,
                    describe_key(&row.keys)
                )));
            }
            Ok(())
        }

        RowOp::Delete => {
            let n = tx.execute(
                "DELETE FROM records WHERE table_name = ?1 AND record_key = ?2",
                rusqlite::params![row.table, encode_key(&row.table, &row.keys)?],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound(format!(
                    "{}[{}]",
                    row.table,
                    describe_key(&row.keys)
                )));
            }
            Ok(())
        }
    }
}

fn insert_audit(tx: &Connection, record: &AuditRecord) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO audit_log (audit_id, correlation_id, table_name, record_key, operation, actor_id, recorded_at, payload, checksum) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.audit_id().as_bytes().as_slice(),
            record.correlation_id().as_bytes().as_slice(),
            record.table(),
            encode_key(record.table(), record.keys())?,
            record.operation().as_str(),
            record.actor().as_bytes().as_slice(),
            &record.recorded_at().to_bytes()[..],
            record.to_msgpack()?,
            record.checksum().as_bytes().as_slice(),
        ],
    )?;
    Ok(())
}

fn read_row(
    table: String,
    key_bytes: Vec<u8>,
    payload: Vec<u8>,
    deleted: bool,
) -> Result<StoredRow, StorageError> {
    Ok(StoredRow {
        table,
        keys: decode_columns(&key_bytes)?,
        values: decode_columns(&payload)?,
        deleted,
    })
}

/// Decode audit payloads and reject any whose checksum no longer matches.
fn read_audit(payloads: Vec<Vec<u8>>) -> Result<Vec<AuditRecord>, StorageError> {
    let mut records = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let record = AuditRecord::from_msgpack(&payload)?;
        record.verify_checksum()?;
        records.push(record);
    }
    Ok(records)
}

impl SqliteStorage {
    fn query_row_by_key(
        &self,
        table: &str,
        keys: &Columns,
        include_deleted: bool,
    ) -> Result<Option<StoredRow>, StorageError> {
        let sql = if include_deleted {
            "SELECT table_name, record_key, payload, is_deleted FROM records WHERE table_name = ?1 AND record_key = ?2"
        } else {
            "SELECT table_name, record_key, payload, is_deleted FROM records WHERE table_name = ?1 AND record_key = ?2 AND is_deleted = 0"
        };
        let raw = self
            .conn
            .query_row(
                sql,
                rusqlite::params![table, encode_key(table, keys)?],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;
        match raw {
            Some((table, key_bytes, payload, deleted)) => {
                Ok(Some(read_row(table, key_bytes, payload, deleted)?))
            }
            None => Ok(None),
        }
    }
}

impl Storage for SqliteStorage {
    fn write_batch(
        &mut self,
        batch: &WriteBatch,
        cancel: &CancelSignal,
    ) -> Result<BatchOutcome, StorageError> {
        if cancel.is_cancelled() {
            warn!("write batch cancelled before start");
            return Err(StorageError::Cancelled);
        }

        let tx = self.conn.transaction()?;
        let mut outcome = BatchOutcome::default();

        for (index, row) in batch.rows.iter().enumerate() {
            write_row(&tx, index, row, &mut outcome.generated_keys)?;
            outcome.affected += 1;
        }
        for record in &batch.audit {
            insert_audit(&tx, record)?;
        }

        if cancel.is_cancelled() {
            // Dropping the transaction rolls it back.
            warn!(rows = batch.rows.len(), "write batch cancelled before commit");
            return Err(StorageError::Cancelled);
        }
        tx.commit()?;

        debug!(
            rows = outcome.affected,
            audit = batch.audit.len(),
            generated = outcome.generated_keys.len(),
            "write batch committed"
        );
        Ok(outcome)
    }

    fn append_audit(
        &mut self,
        records: &[AuditRecord],
        cancel: &CancelSignal,
    ) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let tx = self.conn.transaction()?;
        for record in records {
            insert_audit(&tx, record)?;
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        tx.commit()?;
        debug!(audit = records.len(), "audit records appended");
        Ok(())
    }

    fn get_row(&self, table: &str, keys: &Columns) -> Result<Option<StoredRow>, StorageError> {
        self.query_row_by_key(table, keys, false)
    }

    fn get_row_including_deleted(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Option<StoredRow>, StorageError> {
        self.query_row_by_key(table, keys, true)
    }

    fn list_rows(&self, table: &str) -> Result<Vec<StoredRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, record_key, payload, is_deleted FROM records WHERE table_name = ?1 AND is_deleted = 0 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(rusqlite::params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (table, key_bytes, payload, deleted) = row?;
            result.push(read_row(table, key_bytes, payload, deleted)?);
        }
        Ok(result)
    }

    fn get_audit_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM audit_log WHERE correlation_id = ?1 ORDER BY rowid")?;
        let payloads = stmt
            .query_map(
                rusqlite::params![correlation_id.as_bytes().as_slice()],
                |row| row.get::<_, Vec<u8>>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        read_audit(payloads)
    }

    fn get_audit_for_entity(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM audit_log WHERE table_name = ?1 AND record_key = ?2 ORDER BY rowid",
        )?;
        let payloads = stmt
            .query_map(rusqlite::params![table, encode_key(table, keys)?], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        read_audit(payloads)
    }

    fn audit_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
