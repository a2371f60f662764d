//! Builds one pending audit record per classified entity.

use std::collections::BTreeSet;

use writetrail_core::{
    entity::key_values, field_value::changed_columns, ActorId, AuditOperation, Columns,
    CorrelationId, FieldValue, Hlc, PendingAuditRecord,
};

use crate::scanner::{ChangeKind, Classified};
use crate::tracker::TrackedEntry;

/// Values shared by every record of one commit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuditContext {
    pub correlation_id: CorrelationId,
    pub actor: ActorId,
    pub at: Hlc,
}

fn excluded_columns(entry: &TrackedEntry) -> BTreeSet<&'static str> {
    let mut excluded = BTreeSet::new();
    if let Some(auditable) = entry.entity.auditable() {
        excluded.extend(auditable.metadata_columns().iter().copied());
    }
    if let Some(soft) = entry.entity.soft_deletable() {
        excluded.extend(soft.metadata_columns().iter().copied());
    }
    excluded
}

/// Entity columns plus flattened owned sub-object columns.
pub(crate) fn current_columns(entry: &TrackedEntry) -> Columns {
    let mut cols = entry.entity.properties();
    cols.extend(entry.entity.owned_properties());
    cols
}

fn original_columns(entry: &TrackedEntry) -> Columns {
    let mut cols = entry.original.clone();
    cols.extend(entry.original_owned.clone());
    cols
}

/// Exactly one record per classified entity. Metadata columns are left out
/// of the value maps unless they are the only columns that changed.
pub(crate) fn build(
    entry: &TrackedEntry,
    classified: &Classified,
    ctx: &AuditContext,
) -> PendingAuditRecord {
    let operation = match classified.kind {
        ChangeKind::Added => AuditOperation::Create,
        ChangeKind::Modified => AuditOperation::Update,
        ChangeKind::SoftDeleted => AuditOperation::SoftDelete,
        ChangeKind::Deleted => AuditOperation::Delete,
    };
    let excluded = excluded_columns(entry);
    let mut pending = PendingAuditRecord::open(
        ctx.correlation_id,
        entry.entity.table(),
        operation,
        ctx.actor,
        ctx.at,
    );
    pending.set_keys(key_values(entry.entity.as_ref()));

    match operation {
        AuditOperation::Create => {
            for (column, value) in current_columns(entry) {
                if excluded.contains(column.as_str()) {
                    continue;
                }
                pending.mark_changed(&column);
                pending.record_new(&column, value);
            }
        }
        AuditOperation::Update | AuditOperation::SoftDelete => {
            let old = original_columns(entry);
            let new = current_columns(entry);
            let changed = changed_columns(&old, &new);
            let effective: Vec<&str> = changed
                .iter()
                .copied()
                .filter(|c| !excluded.contains(*c))
                .collect();
            let recorded = if effective.is_empty() { changed } else { effective };
            for column in recorded {
                pending.mark_changed(column);
                pending.record_old(column, old.get(column).cloned().unwrap_or(FieldValue::Null));
                pending.record_new(column, new.get(column).cloned().unwrap_or(FieldValue::Null));
            }
        }
        AuditOperation::Delete => {
            for (column, value) in original_columns(entry) {
                if excluded.contains(column.as_str()) {
                    continue;
                }
                pending.mark_changed(&column);
                pending.record_old(&column, value);
            }
        }
    }
    pending
}
