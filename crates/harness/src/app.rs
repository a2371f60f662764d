use tempfile::TempDir;

use writetrail_core::{ActorId, AuditRecord, CorrelationId, FixedClock, Hlc};
use writetrail_engine::{
    CommitError, CommitOutcome, EngineError, EventEnvelope, InMemoryBus, UnitOfWork,
};
use writetrail_storage::{SqliteStorage, Storage, StorageError};

use crate::faults::FaultyStorage;

pub const EPOCH_MS: u64 = 1_700_000_000_000;

/// One actor working against its own database through a unit of work.
pub struct TestApp {
    pub actor: ActorId,
    pub uow: UnitOfWork<FaultyStorage, InMemoryBus>,
    _dir: Option<TempDir>,
}

impl TestApp {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::from_storage(SqliteStorage::open_in_memory()?, None))
    }

    /// File-backed database in a temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("writetrail.db");
        let storage = SqliteStorage::open(path.to_str().ok_or("non-utf8 temp path")?)?;
        Ok(Self::from_storage(storage, Some(dir)))
    }

    fn from_storage(storage: SqliteStorage, dir: Option<TempDir>) -> Self {
        let clock = FixedClock::new(Hlc::new(EPOCH_MS, 0));
        Self {
            actor: ActorId::new(),
            uow: UnitOfWork::with_clock(FaultyStorage::new(storage), InMemoryBus::new(), Box::new(clock)),
            _dir: dir,
        }
    }

    pub fn commit(&mut self) -> Result<CommitOutcome, CommitError> {
        self.uow.commit(self.actor)
    }

    pub fn storage(&self) -> &FaultyStorage {
        self.uow.storage()
    }

    pub fn faults(&mut self) -> &mut FaultyStorage {
        self.uow.storage_mut()
    }

    pub fn audit_for(&self, correlation_id: CorrelationId) -> Result<Vec<AuditRecord>, EngineError> {
        Ok(self.storage().get_audit_for_correlation(correlation_id)?)
    }

    pub fn audit_count(&self) -> Result<u64, EngineError> {
        Ok(self.storage().audit_count()?)
    }

    pub fn published(&self) -> &[EventEnvelope] {
        self.uow.bus().published()
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.published().iter().map(|e| e.event.name.as_str()).collect()
    }
}
