use writetrail_core::{AuditRecord, Columns, CorrelationId, FieldValue};

use crate::cancel::CancelSignal;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

/// One business row to persist.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub table: String,
    pub op: RowOp,
    pub keys: Columns,
    pub values: Columns,
    pub soft_deleted: bool,
    /// Key column the storage engine fills in on insert.
    pub generated_key: Option<String>,
}

/// Everything that must become durable atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub rows: Vec<RowWrite>,
    pub audit: Vec<AuditRecord>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.audit.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub row_index: usize,
    pub column: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub affected: usize,
    pub generated_keys: Vec<GeneratedKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub table: String,
    pub keys: Columns,
    pub values: Columns,
    pub deleted: bool,
}

pub trait Storage {
    /// Persist rows and audit records in one transaction. Nothing is written
    /// if any statement fails or `cancel` fires before the commit.
    fn write_batch(
        &mut self,
        batch: &WriteBatch,
        cancel: &CancelSignal,
    ) -> Result<BatchOutcome, StorageError>;

    /// Audit-only write path, used once keys have been resolved.
    fn append_audit(
        &mut self,
        records: &[AuditRecord],
        cancel: &CancelSignal,
    ) -> Result<(), StorageError>;

    /// Default read: soft-deleted rows are filtered out.
    fn get_row(&self, table: &str, keys: &Columns) -> Result<Option<StoredRow>, StorageError>;

    fn get_row_including_deleted(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Option<StoredRow>, StorageError>;

    /// Default read over a whole table, in insertion order.
    fn list_rows(&self, table: &str) -> Result<Vec<StoredRow>, StorageError>;

    fn get_audit_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<AuditRecord>, StorageError>;

    fn get_audit_for_entity(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Vec<AuditRecord>, StorageError>;

    fn audit_count(&self) -> Result<u64, StorageError>;
}
