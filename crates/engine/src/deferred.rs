//! Ledger of audit records waiting for storage-assigned keys.

use writetrail_core::{entity::key_values, AuditRecord, CoreError, PendingAuditRecord};

use crate::audit_builder::current_columns;
use crate::tracker::{ChangeTracker, EntityHandle};

#[derive(Default)]
pub(crate) struct DeferredLedger {
    held: Vec<(EntityHandle, PendingAuditRecord)>,
}

impl DeferredLedger {
    pub(crate) fn hold(&mut self, handle: EntityHandle, pending: PendingAuditRecord) {
        self.held.push((handle, pending));
    }

    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Finalize every held record from the entity's materialized keys. Must
    /// only run after the primary write has committed. A failure is confined
    /// to the entity it belongs to.
    pub(crate) fn resolve(self, tracker: &ChangeTracker) -> Resolution {
        let mut resolution = Resolution::default();
        for (handle, pending) in self.held {
            let entry = tracker.entry(handle);
            let keys = key_values(entry.entity.as_ref());
            match pending.resolve(keys, &current_columns(entry)) {
                Ok(record) => resolution.records.push(record),
                Err(e) => resolution.failures.push((handle, e)),
            }
        }
        resolution
    }
}

#[derive(Default)]
pub(crate) struct Resolution {
    pub(crate) records: Vec<AuditRecord>,
    pub(crate) failures: Vec<(EntityHandle, CoreError)>,
}

#[cfg(test)]
mod tests {
    use writetrail_core::{ActorId, CorrelationId, Entity, FieldValue, Hlc};

    use super::*;
    use crate::audit_builder::{build, AuditContext};
    use crate::scanner::scan;
    use crate::testing::Gadget;

    #[test]
    fn resolves_after_key_assignment() {
        let mut tracker = ChangeTracker::new();
        let h = tracker.add(Gadget::new("Widget"));
        let ctx = AuditContext {
            correlation_id: CorrelationId::new(),
            actor: ActorId::new(),
            at: Hlc::new(1_700_000_000_000, 0),
        };
        let classified = scan(&mut tracker, ctx.actor, ctx.at).unwrap();
        let pending = build(tracker.entry(h), &classified[0], &ctx);

        let mut ledger = DeferredLedger::default();
        ledger.hold(h, pending);
        assert_eq!(ledger.len(), 1);

        tracker
            .entry_mut(h)
            .entity
            .assign_key("id", FieldValue::Integer(17))
            .unwrap();
        let resolution = ledger.resolve(&tracker);
        assert!(resolution.failures.is_empty());
        let records = resolution.records;
        assert_eq!(records[0].keys().get("id"), Some(&FieldValue::Integer(17)));
        assert_eq!(records[0].new_values().get("id"), Some(&FieldValue::Integer(17)));
    }

    #[test]
    fn unresolved_key_fails_only_its_own_record() {
        let mut tracker = ChangeTracker::new();
        let resolved = tracker.add(Gadget::new("Keyed"));
        let unresolved = tracker.add(Gadget::new("Keyless"));
        let ctx = AuditContext {
            correlation_id: CorrelationId::new(),
            actor: ActorId::new(),
            at: Hlc::new(1_700_000_000_000, 0),
        };
        let classified = scan(&mut tracker, ctx.actor, ctx.at).unwrap();
        let mut ledger = DeferredLedger::default();
        for item in &classified {
            ledger.hold(item.handle, build(tracker.entry(item.handle), item, &ctx));
        }
        tracker
            .entry_mut(resolved)
            .entity
            .assign_key("id", FieldValue::Integer(3))
            .unwrap();

        let resolution = ledger.resolve(&tracker);
        assert_eq!(resolution.records.len(), 1);
        assert_eq!(
            resolution.records[0].keys().get("id"),
            Some(&FieldValue::Integer(3))
        );
        assert_eq!(resolution.failures.len(), 1);
        assert_eq!(resolution.failures[0].0, unresolved);
        assert!(matches!(
            resolution.failures[0].1,
            CoreError::UnresolvedKey { .. }
        ));
    }
}
