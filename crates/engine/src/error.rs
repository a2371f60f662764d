use thiserror::Error;
use writetrail_core::CoreError;
use writetrail_storage::StorageError;

use crate::config::ConfigError;
use crate::tracker::EntityHandle;

/// Commit failures with no durable effect. Safe to retry the whole operation.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("validation failed: {0}")]
    Validation(#[source] CoreError),

    #[error("primary write failed: {0}")]
    PrimaryWrite(#[source] StorageError),

    #[error("commit cancelled before the primary write")]
    Cancelled,

    #[error("clock unavailable: {0}")]
    Clock(#[source] CoreError),
}

/// Why the deferred audit records of a commit were not persisted.
#[derive(Debug, Error)]
pub enum DeferredAuditError {
    #[error("key resolution failed: {0}")]
    Resolve(#[from] CoreError),

    #[error("deferred audit write failed: {0}")]
    Write(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("entity handle not tracked: {0:?}")]
    UnknownHandle(EntityHandle),

    #[error("entity already detached: {0:?}")]
    Detached(EntityHandle),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
