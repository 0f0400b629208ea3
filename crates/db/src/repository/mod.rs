//! Repository functions: one function per database operation.
//!
//! Every function takes a `&PgPool` (or, for the pieces of a multi-table
//! write, a `&mut PgConnection`) and returns a `Result<T, DbError>`.
//! No business logic, no domain types: pure SQL.

pub mod config;
pub mod nodes;
pub mod records;
pub mod tasks;
pub mod workflows;
