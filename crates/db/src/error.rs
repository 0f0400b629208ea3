//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write referenced a row that does not exist.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// A stored value could not be decoded into its domain type.
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}
