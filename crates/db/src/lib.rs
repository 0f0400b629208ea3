//! `db` crate: pure persistence layer.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! every table in the schema, and the [`TaskStore`] abstraction the engine
//! writes through. Two stores ship: [`PgStore`] (Postgres, durable) and
//! [`MemoryStore`] (process-local, used by tests and throwaway runs).
//! No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{CallOutcome, NodeState, TaskState};
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::TaskStore;
