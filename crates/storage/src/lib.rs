pub mod error;
pub mod local;
pub mod schema;
pub mod settings;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use local::{LocalStore, MAX_INCIDENTS_STORED, retain_newest};
pub use settings::RoleSettings;
pub use sqlite::SqliteStorage;
pub use traits::*;
