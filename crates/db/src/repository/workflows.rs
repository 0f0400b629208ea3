//! Workflow and step repository functions.

use sqlx::PgConnection;

use crate::{models::WorkflowRecord, DbError};

/// Insert or update every workflow and replace its steps.
///
/// Workflows are never deleted: tasks keep referencing them as audit records.
/// A name may therefore appear on several rows once a configuration moves it
/// to a new id.
pub async fn upsert_workflows(
    conn: &mut PgConnection,
    workflows: &[WorkflowRecord],
) -> Result<(), DbError> {

    for record in workflows {
        let workflow = &record.workflow;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, source_node_id, destination_node_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                source_node_id = EXCLUDED.source_node_id,
                destination_node_id = EXCLUDED.destination_node_id
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.source_node_id)
        .bind(&workflow.destination_node_id)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM steps WHERE workflow_id = $1")
            .bind(workflow.id)
            .execute(&mut *conn)
            .await?;

        for step in &record.steps {
            sqlx::query("INSERT INTO steps (workflow_id, node_id, position) VALUES ($1, $2, $3)")
                .bind(step.workflow_id)
                .bind(&step.node_id)
                .bind(step.position)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}
