//! Arena of entities under change tracking.
//!
//! Handles are stable indices; iteration follows insertion order, which is
//! also the order events are dispatched in. Entries are never removed from the
//! arena, only detached, so a handle stays valid for the life of the tracker.

use writetrail_core::{
    entity::key_values, field_value::changed_columns, Columns, Entity, FieldValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle(usize);

/// What the caller asked for, before change detection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracking {
    Added,
    Tracked,
    Deleted,
    Detached,
}

/// Operation kind as seen by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    Detached,
}

pub(crate) struct TrackedEntry {
    pub(crate) entity: Box<dyn Entity>,
    pub(crate) tracking: Tracking,
    /// Column values as of the last attach or commit.
    pub(crate) original: Columns,
    pub(crate) original_owned: Columns,
    /// Whether the row exists in storage (attached, or inserted by a commit).
    pub(crate) persisted: bool,
}

impl TrackedEntry {
    pub(crate) fn state(&self) -> EntityState {
        match self.tracking {
            Tracking::Added => EntityState::Added,
            Tracking::Deleted => EntityState::Deleted,
            Tracking::Detached => EntityState::Detached,
            Tracking::Tracked => {
                let changed = !changed_columns(&self.original, &self.entity.properties())
                    .is_empty()
                    || self.has_owned_changes();
                if changed {
                    EntityState::Modified
                } else {
                    EntityState::Unchanged
                }
            }
        }
    }

    pub(crate) fn has_owned_changes(&self) -> bool {
        self.tracking == Tracking::Tracked
            && !changed_columns(&self.original_owned, &self.entity.owned_properties()).is_empty()
    }

    /// Original flag state of a soft-deletable entity.
    pub(crate) fn was_soft_deleted(&self) -> bool {
        self.entity.soft_deletable().is_some_and(|sd| {
            self.original.get(sd.deleted_column()) == Some(&FieldValue::Boolean(true))
        })
    }

    /// Snapshot current values as the new baseline.
    pub(crate) fn accept(&mut self) {
        self.original = self.entity.properties();
        self.original_owned = self.entity.owned_properties();
        self.tracking = Tracking::Tracked;
        self.persisted = true;
    }
}

#[derive(Default)]
pub struct ChangeTracker {
    entries: Vec<TrackedEntry>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new entity to be inserted by the next commit.
    pub fn add<T: Entity>(&mut self, entity: T) -> EntityHandle {
        self.push(TrackedEntry {
            entity: Box::new(entity),
            tracking: Tracking::Added,
            original: Columns::new(),
            original_owned: Columns::new(),
            persisted: false,
        })
    }

    /// Track an entity that already exists in storage, in its current state.
    pub fn attach<T: Entity>(&mut self, entity: T) -> EntityHandle {
        let original = entity.properties();
        let original_owned = entity.owned_properties();
        self.push(TrackedEntry {
            entity: Box::new(entity),
            tracking: Tracking::Tracked,
            original,
            original_owned,
            persisted: true,
        })
    }

    fn push(&mut self, entry: TrackedEntry) -> EntityHandle {
        self.entries.push(entry);
        EntityHandle(self.entries.len() - 1)
    }

    /// Mark for deletion. An entity never written is simply detached.
    /// Returns false if the handle is unknown or already detached.
    pub fn remove(&mut self, handle: EntityHandle) -> bool {
        let Some(entry) = self.entries.get_mut(handle.0) else {
            return false;
        };
        match entry.tracking {
            Tracking::Added => {
                entry.tracking = Tracking::Detached;
                true
            }
            Tracking::Tracked | Tracking::Deleted => {
                entry.tracking = Tracking::Deleted;
                true
            }
            Tracking::Detached => false,
        }
    }

    pub fn get<T: Entity>(&self, handle: EntityHandle) -> Option<&T> {
        self.entries
            .get(handle.0)
            .and_then(|e| e.entity.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Entity>(&mut self, handle: EntityHandle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.0)
            .and_then(|e| e.entity.as_any_mut().downcast_mut::<T>())
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&dyn Entity> {
        self.entries.get(handle.0).map(|e| e.entity.as_ref())
    }

    pub fn state(&self, handle: EntityHandle) -> Option<EntityState> {
        self.entries.get(handle.0).map(TrackedEntry::state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identity-map lookup among live entries.
    pub fn find_by_key(&self, table: &str, keys: &Columns) -> Option<EntityHandle> {
        self.entries
            .iter()
            .position(|e| {
                e.tracking != Tracking::Detached
                    && e.entity.table() == table
                    && &key_values(e.entity.as_ref()) == keys
            })
            .map(EntityHandle)
    }

    pub(crate) fn handles(&self) -> Vec<EntityHandle> {
        (0..self.entries.len()).map(EntityHandle).collect()
    }

    pub(crate) fn entry(&self, handle: EntityHandle) -> &TrackedEntry {
        &self.entries[handle.0]
    }

    pub(crate) fn entry_mut(&mut self, handle: EntityHandle) -> &mut TrackedEntry {
        &mut self.entries[handle.0]
    }

    pub(crate) fn detach(&mut self, handle: EntityHandle) {
        self.entries[handle.0].tracking = Tracking::Detached;
    }

    /// Undo a delete request, keeping the current values.
    pub(crate) fn restore(&mut self, handle: EntityHandle) {
        let entry = &mut self.entries[handle.0];
        if entry.tracking == Tracking::Deleted {
            entry.tracking = Tracking::Tracked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Gadget, Note};

    #[test]
    fn state_follows_snapshot_diff() {
        let mut tracker = ChangeTracker::new();
        let h = tracker.attach(Gadget::persisted(1, "Widget"));
        assert_eq!(tracker.state(h), Some(EntityState::Unchanged));

        tracker.get_mut::<Gadget>(h).unwrap().name = "Gizmo".into();
        assert_eq!(tracker.state(h), Some(EntityState::Modified));

        tracker.get_mut::<Gadget>(h).unwrap().name = "Widget".into();
        assert_eq!(tracker.state(h), Some(EntityState::Unchanged));
    }

    #[test]
    fn owned_change_marks_owner_modified() {
        let mut tracker = ChangeTracker::new();
        let h = tracker.attach(Gadget::persisted(1, "Widget"));
        tracker.get_mut::<Gadget>(h).unwrap().dimensions.width = 3;
        assert_eq!(tracker.state(h), Some(EntityState::Modified));
        assert!(tracker.entry(h).has_owned_changes());
    }

    #[test]
    fn removing_added_entity_detaches_it() {
        let mut tracker = ChangeTracker::new();
        let added = tracker.add(Gadget::new("Draft"));
        let attached = tracker.attach(Note::persisted("n1", "body"));

        assert!(tracker.remove(added));
        assert!(tracker.remove(attached));
        assert_eq!(tracker.state(added), Some(EntityState::Detached));
        assert_eq!(tracker.state(attached), Some(EntityState::Deleted));
        assert!(!tracker.remove(added));
    }

    #[test]
    fn identity_map_matches_table_and_key() {
        let mut tracker = ChangeTracker::new();
        let gadget = tracker.attach(Gadget::persisted(7, "Widget"));
        let note = tracker.attach(Note::persisted("7", "body"));

        let gadget_key = Columns::from([("id".to_string(), FieldValue::Integer(7))]);
        let note_key = Columns::from([("code".to_string(), FieldValue::from("7"))]);
        assert_eq!(tracker.find_by_key("gadgets", &gadget_key), Some(gadget));
        assert_eq!(tracker.find_by_key("notes", &note_key), Some(note));
        assert_eq!(tracker.find_by_key("notes", &gadget_key), None);

        tracker.detach(gadget);
        assert_eq!(tracker.find_by_key("gadgets", &gadget_key), None);
    }

    #[test]
    fn accept_resets_baseline() {
        let mut tracker = ChangeTracker::new();
        let h = tracker.add(Gadget::new("Widget"));
        assert!(!tracker.entry(h).persisted);

        tracker.entry_mut(h).accept();
        assert!(tracker.entry(h).persisted);
        assert_eq!(tracker.state(h), Some(EntityState::Unchanged));
        assert_eq!(tracker.get::<Gadget>(h).unwrap().name, "Widget");
        assert!(tracker.get::<Note>(h).is_none());
    }
}
