use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("key collision in {table}: {key}")]
    KeyCollision { table: String, key: String },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },

    #[error("write cancelled before commit")]
    Cancelled,

    #[error("core error: {0}")]
    Core(#[from] writetrail_core::CoreError),
}
