//! Audit records are built in two phases. A [`PendingAuditRecord`] is opened
//! while the commit is scanned; it becomes an immutable [`AuditRecord`] once
//! every key column has a value. Records whose keys are assigned by storage stay
//! pending until after the primary write.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{Columns, FieldValue};
use crate::hlc::Hlc;
use crate::ids::{ActorId, AuditId, Checksum, CorrelationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    SoftDelete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SoftDelete => "soft_delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "soft_delete" => Ok(Self::SoftDelete),
            _ => Err(CoreError::InvalidData(format!("unknown audit operation: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AuditBody {
    audit_id: AuditId,
    correlation_id: CorrelationId,
    table: String,
    operation: AuditOperation,
    keys: Columns,
    old_values: Columns,
    new_values: Columns,
    changed_columns: BTreeSet<String>,
    actor: ActorId,
    recorded_at: Hlc,
}

impl AuditBody {
    fn digest(&self) -> Result<Checksum, CoreError> {
        let bytes =
            rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Checksum::from_bytes(*blake3::hash(&bytes).as_bytes()))
    }
}

/// An audit record still open for key resolution.
#[derive(Debug, Clone)]
pub struct PendingAuditRecord {
    body: AuditBody,
}

impl PendingAuditRecord {
    pub fn open(
        correlation_id: CorrelationId,
        table: &str,
        operation: AuditOperation,
        actor: ActorId,
        recorded_at: Hlc,
    ) -> Self {
        Self {
            body: AuditBody {
                audit_id: AuditId::new(),
                correlation_id,
                table: table.to_string(),
                operation,
                keys: Columns::new(),
                old_values: Columns::new(),
                new_values: Columns::new(),
                changed_columns: BTreeSet::new(),
                actor,
                recorded_at,
            },
        }
    }

    pub fn set_keys(&mut self, keys: Columns) {
        self.body.keys = keys;
    }

    pub fn record_old(&mut self, column: &str, value: FieldValue) {
        self.body.old_values.insert(column.to_string(), value);
    }

    pub fn record_new(&mut self, column: &str, value: FieldValue) {
        self.body.new_values.insert(column.to_string(), value);
    }

    pub fn mark_changed(&mut self, column: &str) {
        self.body.changed_columns.insert(column.to_string());
    }

    pub fn operation(&self) -> AuditOperation {
        self.body.operation
    }

    pub fn table(&self) -> &str {
        &self.body.table
    }

    pub fn changed_columns(&self) -> &BTreeSet<String> {
        &self.body.changed_columns
    }

    pub fn keys(&self) -> &Columns {
        &self.body.keys
    }

    pub fn new_values(&self) -> &Columns {
        &self.body.new_values
    }

    /// Key columns with no value yet.
    pub fn unresolved_keys(&self) -> Vec<&str> {
        let mut unresolved: Vec<&str> = self
            .body
            .keys
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.as_str())
            .collect();
        if self.body.keys.is_empty() {
            unresolved.push("<no key>");
        }
        unresolved
    }

    pub fn is_deferred(&self) -> bool {
        !self.unresolved_keys().is_empty()
    }

    /// Seal the record. Fails if any key column is still unassigned.
    pub fn finalize(self) -> Result<AuditRecord, CoreError> {
        if let Some(column) = self.unresolved_keys().first() {
            return Err(CoreError::UnresolvedKey {
                table: self.body.table.clone(),
                column: column.to_string(),
            });
        }
        let checksum = self.body.digest()?;
        Ok(AuditRecord {
            body: self.body,
            checksum,
        })
    }

    /// Install materialized keys, fold new values that were unassigned at scan
    /// time (create records only), then seal.
    pub fn resolve(mut self, keys: Columns, current: &Columns) -> Result<AuditRecord, CoreError> {
        self.body.keys = keys;
        if self.body.operation == AuditOperation::Create {
            for (column, value) in self.body.new_values.iter_mut() {
                if value.is_null() {
                    if let Some(resolved) = current.get(column) {
                        *value = resolved.clone();
                    }
                }
            }
        }
        self.finalize()
    }
}

/// One row of the append-only audit trail. Never mutated after finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    body: AuditBody,
    checksum: Checksum,
}

impl AuditRecord {
    pub fn audit_id(&self) -> AuditId {
        self.body.audit_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.body.correlation_id
    }

    pub fn table(&self) -> &str {
        &self.body.table
    }

    pub fn operation(&self) -> AuditOperation {
        self.body.operation
    }

    pub fn keys(&self) -> &Columns {
        &self.body.keys
    }

    pub fn old_values(&self) -> &Columns {
        &self.body.old_values
    }

    pub fn new_values(&self) -> &Columns {
        &self.body.new_values
    }

    pub fn changed_columns(&self) -> &BTreeSet<String> {
        &self.body.changed_columns
    }

    pub fn actor(&self) -> ActorId {
        self.body.actor
    }

    pub fn recorded_at(&self) -> Hlc {
        self.body.recorded_at
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn verify_checksum(&self) -> Result<(), CoreError> {
        let expected = self.body.digest()?;
        if expected != self.checksum {
            return Err(CoreError::InvalidData(format!(
                "audit record {} checksum mismatch",
                self.body.audit_id
            )));
        }
        Ok(())
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
