pub mod cancel;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use cancel::CancelSignal;
pub use error::StorageError;
pub use sqlite::SqliteStorage;
pub use traits::*;
