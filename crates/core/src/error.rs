use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("validation failed on {entity}: {message}")]
    Validation { entity: String, message: String },

    #[error("key column {table}.{column} has no value")]
    UnresolvedKey { table: String, column: String },

    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },
}

impl CoreError {
    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            message: message.into(),
        }
    }
}
