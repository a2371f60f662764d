pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod scanner;
pub mod tracker;

mod audit_builder;
mod deferred;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, LoggingConfig, PipelineConfig, StorageConfig};
pub use dispatcher::{BusError, DispatchReport, EventEnvelope, InMemoryBus, NotificationBus};
pub use error::{CommitError, DeferredAuditError, EngineError};
pub use logging::init_logging;
pub use scanner::{ChangeKind, Classified};
pub use tracker::{ChangeTracker, EntityHandle, EntityState};

use tracing::{debug, error, info, info_span, warn};

use writetrail_core::{
    entity::key_values, ActorId, Clock, Columns, CoreError, CorrelationId, Entity, Hlc, HlcClock,
    Hydrate, KeyGeneration,
};
use writetrail_storage::{
    BatchOutcome, CancelSignal, RowOp, RowWrite, SqliteStorage, Storage, StorageError, WriteBatch,
};

use crate::audit_builder::{current_columns, AuditContext};
use crate::deferred::DeferredLedger;
use crate::tracker::TrackedEntry;

/// Inputs fixed for the duration of one commit.
#[derive(Debug, Clone)]
pub struct CommitContext {
    pub actor: ActorId,
    pub now: Hlc,
    pub cancel: CancelSignal,
}

impl CommitContext {
    pub fn new(actor: ActorId, now: Hlc) -> Self {
        Self {
            actor,
            now,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

/// How far a commit got once its primary write succeeded.
#[derive(Debug)]
pub enum CommitStatus {
    Complete,
    /// Primary data is durable but `missing_records` deferred audit records
    /// are not. Records that did resolve are still written. No events were
    /// dispatched; they stay queued on their entities.
    AuditIncomplete {
        error: DeferredAuditError,
        missing_records: usize,
    },
    /// Data and audit are durable; event dispatch stopped at the first
    /// failed publish.
    DispatchIncomplete {
        error: BusError,
        dropped: usize,
    },
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub correlation_id: CorrelationId,
    /// Business rows written by the primary write.
    pub affected: usize,
    /// Audit records made durable, both atomic and deferred.
    pub audit_records: usize,
    pub events_published: usize,
    pub status: CommitStatus,
}

impl CommitOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, CommitStatus::Complete)
    }

    /// Whether repeating the same unit of work is free of duplicate effects.
    /// Never true once the primary write has committed.
    pub fn is_retry_safe(&self) -> bool {
        false
    }
}

impl CommitError {
    /// Every commit error leaves storage untouched.
    pub fn is_retry_safe(&self) -> bool {
        true
    }
}

/// A unit of work: tracks entity changes and commits them together with
/// their audit records, then dispatches the domain events they raised.
pub struct UnitOfWork<S: Storage = SqliteStorage, B: NotificationBus = InMemoryBus> {
    tracker: ChangeTracker,
    storage: S,
    bus: B,
    clock: Box<dyn Clock>,
}

impl<S: Storage, B: NotificationBus> UnitOfWork<S, B> {
    pub fn new(storage: S, bus: B) -> Self {
        Self::with_clock(storage, bus, Box::new(HlcClock::new()))
    }

    pub fn with_clock(storage: S, bus: B, clock: Box<dyn Clock>) -> Self {
        Self {
            tracker: ChangeTracker::new(),
            storage,
            bus,
            clock,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn add<T: Entity>(&mut self, entity: T) -> EntityHandle {
        self.tracker.add(entity)
    }

    pub fn attach<T: Entity>(&mut self, entity: T) -> EntityHandle {
        self.tracker.attach(entity)
    }

    pub fn remove(&mut self, handle: EntityHandle) -> Result<(), EngineError> {
        match self.tracker.state(handle) {
            None => Err(EngineError::UnknownHandle(handle)),
            Some(EntityState::Detached) => Err(EngineError::Detached(handle)),
            Some(_) => {
                self.tracker.remove(handle);
                Ok(())
            }
        }
    }

    pub fn get<T: Entity>(&self, handle: EntityHandle) -> Option<&T> {
        self.tracker.get(handle)
    }

    pub fn get_mut<T: Entity>(&mut self, handle: EntityHandle) -> Option<&mut T> {
        self.tracker.get_mut(handle)
    }

    pub fn state(&self, handle: EntityHandle) -> Option<EntityState> {
        self.tracker.state(handle)
    }

    /// Load one live row, reusing the tracked instance if there is one.
    /// Soft-deleted rows are not returned.
    pub fn find<T: Hydrate>(
        &mut self,
        table: &str,
        keys: &Columns,
    ) -> Result<Option<EntityHandle>, EngineError> {
        if let Some(handle) = self.tracker.find_by_key(table, keys) {
            let deleted = self
                .tracker
                .entity(handle)
                .and_then(|e| e.soft_deletable())
                .is_some_and(|s| s.is_deleted());
            return Ok((!deleted).then_some(handle));
        }
        match self.storage.get_row(table, keys)? {
            Some(row) => Ok(Some(self.tracker.attach(T::hydrate(&row.values)?))),
            None => Ok(None),
        }
    }

    /// Load every live row of a table.
    pub fn find_all<T: Hydrate>(&mut self, table: &str) -> Result<Vec<EntityHandle>, EngineError> {
        let rows = self.storage.list_rows(table)?;
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let handle = match self.tracker.find_by_key(table, &row.keys) {
                Some(handle) => handle,
                None => self.tracker.attach(T::hydrate(&row.values)?),
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn commit(&mut self, actor: ActorId) -> Result<CommitOutcome, CommitError> {
        let now = self.clock.now().map_err(CommitError::Clock)?;
        self.commit_with(CommitContext::new(actor, now))
    }

    /// Persist all tracked changes.
    ///
    /// `Err` means nothing was written. `Ok` means the primary write is
    /// durable; inspect [`CommitOutcome::status`] for the audit and dispatch
    /// phases that follow it.
    pub fn commit_with(&mut self, ctx: CommitContext) -> Result<CommitOutcome, CommitError> {
        let correlation_id = CorrelationId::new();
        let span = info_span!("commit", %correlation_id, actor = %ctx.actor);
        let _enter = span.enter();

        if ctx.cancel.is_cancelled() {
            debug!("commit cancelled before scan");
            return Err(CommitError::Cancelled);
        }

        let classified = scanner::scan(&mut self.tracker, ctx.actor, ctx.now)
            .map_err(CommitError::Validation)?;

        let audit_ctx = AuditContext {
            correlation_id,
            actor: ctx.actor,
            at: ctx.now,
        };
        let mut batch = WriteBatch::default();
        let mut row_handles = Vec::with_capacity(classified.len());
        let mut ledger = DeferredLedger::default();
        for item in &classified {
            let entry = self.tracker.entry(item.handle);
            let pending = audit_builder::build(entry, item, &audit_ctx);
            if pending.is_deferred() {
                ledger.hold(item.handle, pending);
            } else {
                batch
                    .audit
                    .push(pending.finalize().map_err(CommitError::Validation)?);
            }
            batch
                .rows
                .push(plan_row(entry, item.kind).map_err(CommitError::Validation)?);
            row_handles.push(item.handle);
        }
        debug!(
            rows = batch.rows.len(),
            audit = batch.audit.len(),
            deferred = ledger.len(),
            "write batch prepared"
        );

        let written = if batch.is_empty() {
            BatchOutcome::default()
        } else {
            self.storage
                .write_batch(&batch, &ctx.cancel)
                .map_err(|e| match e {
                    StorageError::Cancelled => CommitError::Cancelled,
                    other => {
                        warn!(error = %other, "primary write rolled back");
                        CommitError::PrimaryWrite(other)
                    }
                })?
        };

        // The primary write is durable from here on; nothing below may fail
        // the commit.
        let mut rejected_keys: Vec<EntityHandle> = Vec::new();
        for generated in &written.generated_keys {
            let Some(&handle) = row_handles.get(generated.row_index) else {
                continue;
            };
            let entity = &mut self.tracker.entry_mut(handle).entity;
            if let Err(e) = entity.assign_key(&generated.column, generated.value.clone()) {
                error!(
                    table = entity.table(),
                    column = %generated.column,
                    error = %e,
                    "entity rejected its generated key; detaching"
                );
                rejected_keys.push(handle);
            }
        }

        for item in &classified {
            if item.kind == ChangeKind::Deleted || rejected_keys.contains(&item.handle) {
                self.tracker.detach(item.handle);
            } else {
                self.tracker.entry_mut(item.handle).accept();
            }
        }

        let deferred = self.write_deferred(ledger);
        let audit_records = batch.audit.len() + deferred.written;
        if let Some((error, missing_records)) = deferred.failure {
            error!(
                missing_records,
                error = %error,
                "deferred audit incomplete after primary commit; events not dispatched"
            );
            return Ok(CommitOutcome {
                correlation_id,
                affected: written.affected,
                audit_records,
                events_published: 0,
                status: CommitStatus::AuditIncomplete {
                    error,
                    missing_records,
                },
            });
        }

        let envelopes = dispatcher::collect(&mut self.tracker, correlation_id);
        let report = dispatcher::publish_all(&mut self.bus, envelopes);
        let status = match report.failure {
            Some(error) => CommitStatus::DispatchIncomplete {
                error,
                dropped: report.dropped,
            },
            None => CommitStatus::Complete,
        };

        info!(
            affected = written.affected,
            audit_records,
            events = report.published,
            complete = matches!(status, CommitStatus::Complete),
            "commit finished"
        );
        Ok(CommitOutcome {
            correlation_id,
            affected: written.affected,
            audit_records,
            events_published: report.published,
            status,
        })
    }

    /// Resolve and append deferred records. Entities whose keys did not
    /// resolve lose only their own record; a failed append loses them all.
    fn write_deferred(&mut self, ledger: DeferredLedger) -> DeferredWrite {
        if ledger.is_empty() {
            return DeferredWrite::default();
        }
        let held = ledger.len();
        let resolution = ledger.resolve(&self.tracker);
        if !resolution.records.is_empty() {
            // Past the primary commit: cancellation no longer applies.
            if let Err(e) = self
                .storage
                .append_audit(&resolution.records, &CancelSignal::never())
            {
                return DeferredWrite {
                    written: 0,
                    failure: Some((DeferredAuditError::Write(e), held)),
                };
            }
        }
        debug!(
            records = resolution.records.len(),
            unresolved = resolution.failures.len(),
            "deferred audit records written"
        );
        let missing = resolution.failures.len();
        DeferredWrite {
            written: resolution.records.len(),
            failure: resolution
                .failures
                .into_iter()
                .next()
                .map(|(_, e)| (DeferredAuditError::Resolve(e), missing)),
        }
    }
}

#[derive(Default)]
struct DeferredWrite {
    written: usize,
    failure: Option<(DeferredAuditError, usize)>,
}

impl UnitOfWork<SqliteStorage, InMemoryBus> {
    /// Open storage from configuration with an in-process bus.
    pub fn open(config: &PipelineConfig) -> Result<Self, EngineError> {
        let storage = config.storage.open()?;
        Ok(Self::new(storage, InMemoryBus::new()))
    }

    /// Configure from the process environment and open.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let config = PipelineConfig::load_from(lookup)?;
        Self::open(&config)
    }
}

fn plan_row(entry: &TrackedEntry, kind: ChangeKind) -> Result<RowWrite, CoreError> {
    let entity = entry.entity.as_ref();
    let op = match kind {
        ChangeKind::Added => RowOp::Insert,
        ChangeKind::Modified | ChangeKind::SoftDeleted => RowOp::Update,
        ChangeKind::Deleted => RowOp::Delete,
    };
    let keys = key_values(entity);
    let needs_key = op == RowOp::Insert
        && entity.key_generation() == KeyGeneration::Storage
        && keys.values().all(|v| v.is_null());
    let generated_key = if needs_key {
        match entity.key_columns() {
            [column] => Some(column.to_string()),
            _ => {
                return Err(CoreError::InvalidData(format!(
                    "{}: storage-generated keys need exactly one key column",
                    entity.table()
                )));
            }
        }
    } else {
        None
    };
    Ok(RowWrite {
        table: entity.table().to_string(),
        op,
        keys,
        values: current_columns(entry),
        soft_deleted: entity.soft_deletable().is_some_and(|s| s.is_deleted()),
        generated_key,
    })
}
