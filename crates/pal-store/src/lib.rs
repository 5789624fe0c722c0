// SQLite state store for the pal core.
// All multi-entity writes run inside one immediate transaction via
// Store::write; business rules live in pal-services, not here.

mod db;
mod error;
mod records;
mod schema;

pub mod queries;

pub use db::{Database, Store};
pub use error::{Error, Result};
pub use records::{HistoryBucket, PortCounts, SessionStats};
pub use schema::SCHEMA_VERSION;
