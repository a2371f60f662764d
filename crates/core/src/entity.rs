//! Capability contracts for entities that flow through the commit pipeline.
//!
//! An entity exposes its persisted columns as a [`Columns`] snapshot; the change
//! tracker diffs snapshots instead of intercepting setters. Capabilities are
//! opt-in through the accessor methods, which default to `None`.

use std::any::Any;

use uuid::Uuid;

use crate::error::CoreError;
use crate::event::DomainEvent;
use crate::field_value::{Columns, FieldValue};
use crate::hlc::Hlc;
use crate::ids::ActorId;

/// Who assigns an entity's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// The key is known before the write (e.g. a v7 `EntityId`).
    Caller,
    /// The storage engine assigns a single integer key during the write.
    Storage,
}

pub trait Entity: Any {
    fn table(&self) -> &'static str;

    fn key_columns(&self) -> &'static [&'static str];

    fn key_generation(&self) -> KeyGeneration {
        KeyGeneration::Caller
    }

    /// Current values of every persisted column, keys included.
    fn properties(&self) -> Columns;

    /// Values of owned sub-objects, flattened as `owner.column`.
    fn owned_properties(&self) -> Columns {
        Columns::new()
    }

    /// Called after the primary write for storage-generated keys.
    fn assign_key(&mut self, column: &str, value: FieldValue) -> Result<(), CoreError>;

    fn auditable(&self) -> Option<&dyn Auditable> {
        None
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        None
    }

    fn soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        None
    }

    fn soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        None
    }

    fn event_bearing_mut(&mut self) -> Option<&mut dyn EventBearing> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait Auditable {
    fn stamp_created(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError>;

    fn stamp_modified(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError>;

    /// Stamp columns kept out of audit value maps.
    fn metadata_columns(&self) -> &'static [&'static str] {
        AuditStamps::COLUMNS
    }
}

pub trait SoftDeletable {
    fn is_deleted(&self) -> bool;

    fn mark_deleted(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError>;

    /// The audited flag column.
    fn deleted_column(&self) -> &'static str {
        SoftDeleteState::FLAG_COLUMN
    }

    /// Deleting-actor and timestamp columns, kept out of audit value maps.
    fn metadata_columns(&self) -> &'static [&'static str] {
        SoftDeleteState::METADATA_COLUMNS
    }
}

pub trait EventBearing {
    fn has_pending_events(&self) -> bool;

    /// Returns the queued events and leaves the queue empty.
    fn drain_events(&mut self) -> Vec<DomainEvent>;
}

/// Entities that can be rebuilt from a stored row.
pub trait Hydrate: Entity + Sized {
    fn hydrate(columns: &Columns) -> Result<Self, CoreError>;
}

/// Key values of `entity`, `Null` for keys not yet assigned.
pub fn key_values(entity: &dyn Entity) -> Columns {
    let props = entity.properties();
    entity
        .key_columns()
        .iter()
        .map(|k| {
            let v = props.get(*k).cloned().unwrap_or(FieldValue::Null);
            (k.to_string(), v)
        })
        .collect()
}

/// Creation and modification stamps, embeddable in auditable entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStamps {
    pub created_by: Option<ActorId>,
    pub created_at: Option<Hlc>,
    pub modified_by: Option<ActorId>,
    pub modified_at: Option<Hlc>,
}

impl AuditStamps {
    pub const COLUMNS: &'static [&'static str] =
        &["created_by", "created_at", "modified_by", "modified_at"];

    pub fn stamp_created(&mut self, actor: ActorId, at: Hlc) {
        self.created_by = Some(actor);
        self.created_at = Some(at);
    }

    pub fn stamp_modified(&mut self, actor: ActorId, at: Hlc) {
        self.modified_by = Some(actor);
        self.modified_at = Some(at);
    }

    pub fn write_columns(&self, columns: &mut Columns) {
        columns.insert("created_by".into(), actor_value(self.created_by));
        columns.insert("created_at".into(), hlc_value(self.created_at));
        columns.insert("modified_by".into(), actor_value(self.modified_by));
        columns.insert("modified_at".into(), hlc_value(self.modified_at));
    }

    pub fn read_columns(columns: &Columns) -> Result<Self, CoreError> {
        Ok(Self {
            created_by: read_actor(columns, "created_by")?,
            created_at: read_hlc(columns, "created_at")?,
            modified_by: read_actor(columns, "modified_by")?,
            modified_at: read_hlc(columns, "modified_at")?,
        })
    }
}

/// Soft-delete flag plus deleting actor and time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftDeleteState {
    pub is_deleted: bool,
    pub deleted_by: Option<ActorId>,
    pub deleted_at: Option<Hlc>,
}

impl SoftDeleteState {
    pub const FLAG_COLUMN: &'static str = "is_deleted";
    pub const METADATA_COLUMNS: &'static [&'static str] = &["deleted_by", "deleted_at"];

    /// Setting an already-set flag leaves actor and time untouched.
    pub fn mark(&mut self, actor: ActorId, at: Hlc) {
        if self.is_deleted {
            return;
        }
        self.is_deleted = true;
        self.deleted_by = Some(actor);
        self.deleted_at = Some(at);
    }

    pub fn write_columns(&self, columns: &mut Columns) {
        columns.insert(Self::FLAG_COLUMN.into(), FieldValue::Boolean(self.is_deleted));
        columns.insert("deleted_by".into(), actor_value(self.deleted_by));
        columns.insert("deleted_at".into(), hlc_value(self.deleted_at));
    }

    pub fn read_columns(columns: &Columns) -> Result<Self, CoreError> {
        let is_deleted = match columns.get(Self::FLAG_COLUMN) {
            None | Some(FieldValue::Null) => false,
            Some(FieldValue::Boolean(b)) => *b,
            Some(other) => {
                return Err(CoreError::InvalidData(format!(
                    "is_deleted must be boolean, got {other:?}"
                )));
            }
        };
        Ok(Self {
            is_deleted,
            deleted_by: read_actor(columns, "deleted_by")?,
            deleted_at: read_hlc(columns, "deleted_at")?,
        })
    }
}

fn actor_value(actor: Option<ActorId>) -> FieldValue {
    actor.map_or(FieldValue::Null, |a| FieldValue::Text(a.to_string()))
}

/// Full 12-byte HLC, so the counter survives the round trip.
fn hlc_value(at: Option<Hlc>) -> FieldValue {
    at.map_or(FieldValue::Null, |h| FieldValue::Bytes(h.to_bytes().to_vec()))
}

fn read_actor(columns: &Columns, column: &str) -> Result<Option<ActorId>, CoreError> {
    match columns.get(column) {
        None | Some(FieldValue::Null) => Ok(None),
        Some(FieldValue::Text(s)) => Uuid::parse_str(s)
            .map(|u| Some(ActorId::from_uuid(u)))
            .map_err(|e| CoreError::InvalidData(format!("{column}: {e}"))),
        Some(other) => Err(CoreError::InvalidData(format!(
            "{column} must be text, got {other:?}"
        ))),
    }
}

fn read_hlc(columns: &Columns, column: &str) -> Result<Option<Hlc>, CoreError> {
    match columns.get(column) {
        None | Some(FieldValue::Null) => Ok(None),
        Some(FieldValue::Bytes(bytes)) => {
            let raw: &[u8; 12] = bytes.as_slice().try_into().map_err(|_| {
                CoreError::InvalidData(format!("{column}: expected 12 HLC bytes, got {}", bytes.len()))
            })?;
            Ok(Some(Hlc::from_bytes(raw)))
        }
        Some(other) => Err(CoreError::InvalidData(format!(
            "{column} must be an encoded HLC, got {other:?}"
        ))),
    }
}
