//! Domain entities shared by the integration tests.

use std::any::Any;

use writetrail_core::{
    ActorId, AuditStamps, Auditable, Columns, CoreError, DomainEvent, Entity, EntityId,
    EventBearing, EventQueue, FieldValue, Hlc, Hydrate, KeyGeneration, SoftDeletable,
    SoftDeleteState,
};

pub const WIDGETS: &str = "widgets";
pub const PROJECTS: &str = "projects";
pub const NOTES: &str = "notes";

fn missing(table: &str, column: &str) -> CoreError {
    CoreError::InvalidData(format!("{table}.{column} missing"))
}

fn unknown_key(table: &str, column: &str) -> CoreError {
    CoreError::UnknownColumn {
        table: table.into(),
        column: column.into(),
    }
}

// ============================================================================
// Widget: storage-keyed, auditable, soft-deletable, raises events
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Widget {
    pub id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub stamps: AuditStamps,
    pub deletion: SoftDeleteState,
    events: EventQueue,
}

impl Widget {
    /// A new widget that announces itself with a `WidgetCreated` event.
    pub fn create(name: &str, quantity: i64) -> Self {
        let mut widget = Self {
            name: name.to_string(),
            quantity,
            ..Self::default()
        };
        widget.raise(DomainEvent::new("WidgetCreated").with("name", name));
        widget
    }

    pub fn restock(&mut self, quantity: i64) {
        self.quantity = quantity;
        self.raise(DomainEvent::new("WidgetRestocked").with("quantity", quantity));
    }

    pub fn raise(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn key(id: i64) -> Columns {
        Columns::from([("id".to_string(), FieldValue::Integer(id))])
    }
}

impl Entity for Widget {
    fn table(&self) -> &'static str {
        WIDGETS
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
        cols.insert("quantity".into(), self.quantity.into());
        self.stamps.write_columns(&mut cols);
        self.deletion.write_columns(&mut cols);
        cols
    }

    fn assign_key(&mut self, column: &str, value: FieldValue) -> Result<(), CoreError> {
        match (column, value) {
            ("id", FieldValue::Integer(id)) => {
                self.id = Some(id);
                Ok(())
            }
            (column, _) => Err(unknown_key(WIDGETS, column)),
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

impl Auditable for Widget {
    fn stamp_created(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.stamps.stamp_created(actor, at);
        Ok(())
    }

    fn stamp_modified(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.stamps.stamp_modified(actor, at);
        Ok(())
    }
}

impl SoftDeletable for Widget {
    fn is_deleted(&self) -> bool {
        self.deletion.is_deleted
    }

    fn mark_deleted(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        self.deletion.mark(actor, at);
        Ok(())
    }
}

impl EventBearing for Widget {
    fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.events.drain()
    }
}

impl Hydrate for Widget {
    fn hydrate(columns: &Columns) -> Result<Self, CoreError> {
        Ok(Self {
            id: columns.get("id").and_then(FieldValue::as_integer),
            name: columns
                .get("name")
                .and_then(FieldValue::as_text)
                .ok_or_else(|| missing(WIDGETS, "name"))?
                .to_string(),
            quantity: columns
                .get("quantity")
                .and_then(FieldValue::as_integer)
                .unwrap_or_default(),
            stamps: AuditStamps::read_columns(columns)?,
            deletion: SoftDeleteState::read_columns(columns)?,
            events: EventQueue::new(),
        })
    }
}

// ============================================================================
// Project: caller-keyed, auditable, owns an address
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub street: String,
    pub city: String,
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: EntityId,
    pub title: String,
    pub address: Address,
    pub stamps: AuditStamps,
}

impl Project {
    pub fn new(title: &str, city: &str) -> Self {
        Self {
            id: EntityId::new(),
            title: title.to_string(),
            address: Address {
                street: String::new(),
                city: city.to_string(),
            },
            stamps: AuditStamps::default(),
        }
    }

    pub fn key(&self) -> Columns {
        Columns::from([("id".to_string(), FieldValue::EntityRef(self.id))])
    }
}

impl Entity for Project {
    fn table(&self) -> &'static str {
        PROJECTS
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["id"]
    }

    fn properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("id".into(), FieldValue::EntityRef(self.id));
        cols.insert("title".into(), self.title.as_str().into());
        self.stamps.write_columns(&mut cols);
        cols
    }

    fn owned_properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("address.street".into(), self.address.street.as_str().into());
        cols.insert("address.city".into(), self.address.city.as_str().into());
        cols
    }

    fn assign_key(&mut self, column: &str, _value: FieldValue) -> Result<(), CoreError> {
        Err(unknown_key(PROJECTS, column))
    }

    fn auditable(&self) -> Option<&dyn Auditable> {
        Some(self)
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Auditable for Project {
    fn stamp_created(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::validation(PROJECTS, "title must not be empty"));
        }
        self.stamps.stamp_created(actor, at);
        Ok(())
    }

    fn stamp_modified(&mut self, actor: ActorId, at: Hlc) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::validation(PROJECTS, "title must not be empty"));
        }
        self.stamps.stamp_modified(actor, at);
        Ok(())
    }
}

impl Hydrate for Project {
    fn hydrate(columns: &Columns) -> Result<Self, CoreError> {
        let text = |column: &str| {
            columns
                .get(column)
                .and_then(FieldValue::as_text)
                .map(str::to_string)
                .ok_or_else(|| missing(PROJECTS, column))
        };
        Ok(Self {
            id: columns
                .get("id")
                .and_then(FieldValue::as_entity_ref)
                .ok_or_else(|| missing(PROJECTS, "id"))?,
            title: text("title")?,
            address: Address {
                street: text("address.street")?,
                city: text("address.city")?,
            },
            stamps: AuditStamps::read_columns(columns)?,
        })
    }
}

// ============================================================================
// Note: caller-keyed, hard-deleted, no capabilities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub code: String,
    pub body: String,
}

impl Note {
    pub fn new(code: &str, body: &str) -> Self {
        Self {
            code: code.to_string(),
            body: body.to_string(),
        }
    }

    pub fn key(code: &str) -> Columns {
        Columns::from([("code".to_string(), FieldValue::from(code))])
    }
}

impl Entity for Note {
    fn table(&self) -> &'static str {
        NOTES
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["code"]
    }

    fn properties(&self) -> Columns {
        let mut cols = Columns::new();
        cols.insert("code".into(), self.code.as_str().into());
        cols.insert("body".into(), self.body.as_str().into());
        cols
    }

    fn assign_key(&mut self, column: &str, _value: FieldValue) -> Result<(), CoreError> {
        Err(unknown_key(NOTES, column))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Hydrate for Note {
    fn hydrate(columns: &Columns) -> Result<Self, CoreError> {
        let text = |column: &str| {
            columns
                .get(column)
                .and_then(FieldValue::as_text)
                .map(str::to_string)
                .ok_or_else(|| missing(NOTES, column))
        };
        Ok(Self {
            code: text("code")?,
            body: text("body")?,
        })
    }
}
