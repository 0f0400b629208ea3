//! Postgres pool for the task store.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// A task worker waiting longer than this for a connection gets an error
/// instead of stalling its step forever.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `database_url` with at most `max_connections` connections.
///
/// Connections are checked before being handed out, so a restarted database
/// surfaces as a failed write on the next step rather than a dead socket.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!(max_connections, "connecting to task store");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the schema in `migrations/` at the workspace root.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("applying task store migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
