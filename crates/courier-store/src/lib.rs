//! Courier Store
//!
//! Durable SQLite implementation of the `courier-core` store contract. The
//! same database also holds the session module's state blob, so a single
//! [`SqliteStore`] can serve as both the engine's store and the
//! [`courier_core::SessionPersistence`] of a `PersistingSession`.

mod schema;
pub mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
