//! Entities used by this crate's unit tests.

use std::any::Any;

use writetrail_core::{
    ActorId, AuditStamps, Auditable, Columns, CoreError, DomainEvent, Entity, EventBearing,
    EventQueue, FieldValue, Hlc, Hydrate, KeyGeneration, SoftDeletable, SoftDeleteState,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
}

/// Storage-keyed, auditable, soft-deletable, event-bearing.
#[derive(Debug, Clone, Default)]
pub struct Gadget {
    pub id: Option<i64>,
    pub name: String,
    pub locked: bool,
    pub dimensions: Dimensions,
    pub stamps: AuditStamps,
    pub deletion: SoftDeleteState,
    pub events: EventQueue,
}

impl Gadget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn persisted(id: i64, name: &str) -> Self {
        Self {
            id: Some(id),
            ..Self::new(name)
        }
    }

    pub fn raise(&mut self, name: &str) {
        self.events.push(DomainEvent::new(name).with("name", self.name.as_str()));
    }

    fn guard(&self) -> Result<(), CoreError> {
        if self.locked {
            return Err(CoreError::validation("gadgets", "gadget is locked"));
        }
        Ok(())
    }
}

impl Entity for Gadget {
    fn table(&self) -> &'static str {
        "gadgets"
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["id"]
    }

    fn key_generation(&self) -> KeyGeneration {
        KeyGeneration::Storage
    }

    fn properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("id".into(), self.id.into());
        cols.insert("name".into(), self.name.as_str().into());
        self.stamps.write_columns(&mut cols);
        self.deletion.write_columns(&mut cols);
        cols
    }

    fn owned_properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("dimensions.width".into(), self.dimensions.width.into());
        cols.insert("dimensions.height".into(), self.dimensions.height.into());
        cols
    }

    fn assign_key(&mut self, column: &str, value: FieldValue) -> Result<(), CoreError> {
        match (column, value) {
            ("id", FieldValue::Integer(id)) => {
                self.id = Some(id);
                Ok(())
            }
            (column, _) => Err(CoreError::UnknownColumn {
                table: "gadgets".into(),
                column: column.into(),
            }),
        }
    }

    fn auditable(&self) -> Option<&dyn Auditable> {
        Some(self)
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(self)
    }

    fn soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }

    fn event_bearing_mut(&mut self) -> Option<&mut dyn EventBearing> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Auditable for Gadget {
    fn stamp_created(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.guard()?;
        self.stamps.stamp_created(actor, at);
        Ok(())
    }

    fn stamp_modified(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.guard()?;
        self.stamps.stamp_modified(actor, at);
        Ok(())
    }
}

impl SoftDeletable for Gadget {
    fn is_deleted(&self) -> bool {
        self.deletion.is_deleted
    }

    fn mark_deleted(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.guard()?;
        self.deletion.mark(actor, at);
        Ok(())
    }
}

impl EventBearing for Gadget {
    fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.events.drain()
    }
}

impl Hydrate for Gadget {
    fn hydrate(columns: &Columns) -> Result<Self, CoreError> {
        let name = columns
            .get("name")
            .and_then(FieldValue::as_text)
            .ok_or_else(|| CoreError::InvalidData("gadgets.name missing".into()))?;
        let int = |key: &str| columns.get(key).and_then(FieldValue::as_integer);
        Ok(Self {
            id: int("id"),
            name: name.to_string(),
            locked: false,
            dimensions: Dimensions {
                width: int("dimensions.width").unwrap_or_default(),
                height: int("dimensions.height").unwrap_or_default(),
            },
            stamps: AuditStamps::read_columns(columns)?,
            deletion: SoftDeleteState::read_columns(columns)?,
            events: EventQueue::new(),
        })
    }
}

/// Caller-keyed, hard-deleted, no capabilities.
#[derive(Debug, Clone)]
pub struct Note {
    pub code: String,
    pub body: Option<String>,
}

impl Note {
    pub fn persisted(code: &str, body: &str) -> Self {
        Self {
            code: code.to_string(),
            body: Some(body.to_string()),
        }
    }
}

impl Entity for Note {
    fn table(&self) -> &'static str {
        "notes"
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["code"]
    }

    fn properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("code".into(), self.code.as_str().into());
        cols.insert("body".into(), self.body.clone().into());
        cols
    }

    fn assign_key(&mut self, column: &str, _value: FieldValue) -> Result<(), CoreError> {
        Err(CoreError::UnknownColumn {
            table: "notes".into(),
            column: column.into(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Storage-keyed on a text column, so it rejects the integer key SQLite
/// hands back.
#[derive(Debug, Clone, Default)]
pub struct Ticket {
    pub number: Option<String>,
    pub title: String,
}

impl Entity for Ticket {
    fn table(&self) -> &'static str {
        "tickets"
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["number"]
    }

    fn key_generation(&self) -> KeyGeneration {
        KeyGeneration::Storage
    }

    fn properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("number".into(), self.number.clone().into());
        cols.insert("title".into(), self.title.as_str().into());
        cols
    }

    fn assign_key(&mut self, column: &str, value: FieldValue) -> Result<(), CoreError> {
        match (column, value) {
            ("number", FieldValue::Text(number)) => {
                self.number = Some(number);
                Ok(())
            }
            (column, other) => Err(CoreError::InvalidData(format!(
                "tickets.{column}: expected text key, got {other:?}"
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
