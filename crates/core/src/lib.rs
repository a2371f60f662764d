pub mod audit;
pub mod entity;
pub mod error;
pub mod event;
pub mod field_value;
pub mod hlc;
pub mod ids;

pub use audit::{AuditOperation, AuditRecord, PendingAuditRecord};
pub use entity::{
    AuditStamps, Auditable, Entity, EventBearing, Hydrate, KeyGeneration, SoftDeletable,
    SoftDeleteState,
};
pub use error::CoreError;
pub use event::{DomainEvent, EventQueue};
pub use field_value::{Columns, FieldValue};
pub use hlc::{Clock, FixedClock, Hlc, HlcClock};
pub use ids::*;
