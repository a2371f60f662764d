use writetrail_core::{AuditRecord, Columns, CorrelationId};
use writetrail_storage::{
    BatchOutcome, CancelSignal, SqliteStorage, Storage, StorageError, StoredRow, WriteBatch,
};

/// SQLite storage with switchable failures on the write paths.
pub struct FaultyStorage {
    inner: SqliteStorage,
    /// Reject the next primary write batches.
    pub fail_primary: bool,
    /// Reject audit-only appends (the deferred path).
    pub fail_append: bool,
    /// Fired after the batch starts, so the storage sees it before commit.
    pub cancel_mid_write: Option<CancelSignal>,
    pub primary_attempts: usize,
    pub append_attempts: usize,
}

impl FaultyStorage {
    pub fn new(inner: SqliteStorage) -> Self {
        Self {
            inner,
            fail_primary: false,
            fail_append: false,
            cancel_mid_write: None,
            primary_attempts: 0,
            append_attempts: 0,
        }
    }

    pub fn inner(&self) -> &SqliteStorage {
        &self.inner
    }
}

impl Storage for FaultyStorage {
    fn write_batch(
        &mut self,
        batch: &WriteBatch,
        cancel: &CancelSignal,
    ) -> Result<BatchOutcome, StorageError> {
        self.primary_attempts += 1;
        if self.fail_primary {
            return Err(StorageError::Serialization("injected primary write failure".into()));
        }
        if let Some(signal) = &self.cancel_mid_write {
            signal.cancel();
        }
        self.inner.write_batch(batch, cancel)
    }

    fn append_audit(
        &mut self,
        records: &[AuditRecord],
        cancel: &CancelSignal,
    ) -> Result<(), StorageError> {
        self.append_attempts += 1;
        if self.fail_append {
            return Err(StorageError::Serialization("injected audit append failure".into()));
        }
        self.inner.append_audit(records, cancel)
    }

    fn get_row(&self, table: &str, keys: &Columns) -> Result<Option<StoredRow>, StorageError> {
        self.inner.get_row(table, keys)
    }

    fn get_row_including_deleted(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Option<StoredRow>, StorageError> {
        self.inner.get_row_including_deleted(table, keys)
    }

    fn list_rows(&self, table: &str) -> Result<Vec<StoredRow>, StorageError> {
        self.inner.list_rows(table)
    }

    fn get_audit_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        self.inner.get_audit_for_correlation(correlation_id)
    }

    fn get_audit_for_entity(
        &self,
        table: &str,
        keys: &Columns,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        self.inner.get_audit_for_entity(table, keys)
    }

    fn audit_count(&self) -> Result<u64, StorageError> {
        self.inner.audit_count()
    }
}
