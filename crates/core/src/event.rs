use serde::{Deserialize, Serialize};

use crate::field_value::{Columns, FieldValue};

/// A business fact queued on an entity, published after the commit is durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub name: String,
    pub payload: Columns,
}

impl DomainEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Columns::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Pending events in queue order.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    pending: Vec<DomainEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DomainEvent) {
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending)
    }
}
