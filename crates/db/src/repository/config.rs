//! Configuration mirror: nodes and workflows written together.

use sqlx::PgPool;

use crate::models::{NodeRecord, WorkflowRecord};
use crate::repository::{nodes, workflows};
use crate::DbError;

/// Upsert nodes then workflows in a single transaction, so a rejected
/// workflow leaves the node rows untouched too.
pub async fn sync_config(
    pool: &PgPool,
    node_records: &[NodeRecord],
    workflow_records: &[WorkflowRecord],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    nodes::upsert_nodes(&mut tx, node_records).await?;
    workflows::upsert_workflows(&mut tx, workflow_records).await?;
    tx.commit().await?;
    Ok(())
}
