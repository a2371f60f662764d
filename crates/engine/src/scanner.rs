//! Pre-commit mutation scan.
//!
//! Stages run strictly in order: detect, soft-delete conversion, stamping.
//! Final column diffing happens afterwards in the audit builder, so the
//! soft-delete flag flip and the stamps are both visible to it.

use tracing::debug;

use writetrail_core::{ActorId, CoreError, Hlc};

use crate::tracker::{ChangeTracker, EntityHandle, EntityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    SoftDeleted,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub handle: EntityHandle,
    pub kind: ChangeKind,
    pub owned_changed: bool,
}

/// Classify every tracked entity and stamp metadata in place.
///
/// Errors raised by entity setters abort the scan unchanged; nothing has been
/// written at that point.
pub(crate) fn scan(
    tracker: &mut ChangeTracker,
    actor: ActorId,
    at: Hlc,
) -> Result<Vec<Classified>, CoreError> {
    let detected = detect(tracker);
    let classified = convert_soft_deletes(tracker, detected, actor, at)?;
    stamp(tracker, &classified, actor, at)?;
    debug!(classified = classified.len(), "mutation scan complete");
    Ok(classified)
}

fn classify(tracker: &ChangeTracker, handle: EntityHandle) -> Option<Classified> {
    let entry = tracker.entry(handle);
    let owned_changed = entry.has_owned_changes();
    let kind = match entry.state() {
        EntityState::Added => ChangeKind::Added,
        EntityState::Modified => ChangeKind::Modified,
        EntityState::Deleted => ChangeKind::Deleted,
        EntityState::Unchanged | EntityState::Detached => return None,
    };
    Some(Classified {
        handle,
        kind,
        owned_changed,
    })
}

fn detect(tracker: &ChangeTracker) -> Vec<Classified> {
    tracker
        .handles()
        .into_iter()
        .filter_map(|h| classify(tracker, h))
        .collect()
}

/// Rewrite delete intents against soft-deletable entities into flag updates.
/// A row whose stored flag is already set gets no second delete.
fn convert_soft_deletes(
    tracker: &mut ChangeTracker,
    detected: Vec<Classified>,
    actor: ActorId,
    at: Hlc,
) -> Result<Vec<Classified>, CoreError> {
    let mut classified = Vec::with_capacity(detected.len());
    for mut c in detected {
        if c.kind != ChangeKind::Deleted {
            classified.push(c);
            continue;
        }
        let entry = tracker.entry_mut(c.handle);
        if entry.entity.soft_deletable().is_none() {
            classified.push(c);
            continue;
        }

        if entry.was_soft_deleted() {
            debug!(table = entry.entity.table(), "delete of soft-deleted row is a no-op");
            tracker.restore(c.handle);
            if let Some(reclassified) = classify(tracker, c.handle) {
                classified.push(reclassified);
            }
            continue;
        }

        if let Some(soft) = entry.entity.soft_deletable_mut() {
            soft.mark_deleted(actor, at)?;
        }
        c.kind = ChangeKind::SoftDeleted;
        classified.push(c);
    }
    Ok(classified)
}

fn stamp(
    tracker: &mut ChangeTracker,
    classified: &[Classified],
    actor: ActorId,
    at: Hlc,
) -> Result<(), CoreError> {
    for c in classified {
        let entity = &mut tracker.entry_mut(c.handle).entity;
        let Some(auditable) = entity.auditable_mut() else {
            continue;
        };
        match c.kind {
            ChangeKind::Added => {
                auditable.stamp_created(actor, at)?;
                auditable.stamp_modified(actor, at)?;
            }
            ChangeKind::Modified | ChangeKind::SoftDeleted => {
                auditable.stamp_modified(actor, at)?;
            }
            ChangeKind::Deleted => {}
        }
    }
    Ok(())
}
