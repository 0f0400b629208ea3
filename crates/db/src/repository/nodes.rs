//! Node repository functions.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use crate::{models::NodeRecord, DbError};

/// Insert or update every node and replace its properties.
///
/// Runs on the caller's connection so it can share a transaction with the
/// workflow upsert.
pub async fn upsert_nodes(conn: &mut PgConnection, nodes: &[NodeRecord]) -> Result<(), DbError> {
    let now = Utc::now();

    for node in nodes {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, name, kind, state, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, kind = EXCLUDED.kind,
                state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.kind)
        .bind(node.state.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM node_properties WHERE node_id = $1")
            .bind(&node.id)
            .execute(&mut *conn)
            .await?;

        for (name, value) in &node.properties {
            sqlx::query("INSERT INTO node_properties (node_id, name, value) VALUES ($1, $2, $3)")
                .bind(&node.id)
                .bind(name)
                .bind(value)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}

/// Update the state (and `updated_at`) of a single node.
pub async fn update_node_state(pool: &PgPool, node_id: &str, state: &str) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE nodes SET state = $1, updated_at = $2 WHERE id = $3")
        .bind(state)
        .bind(Utc::now())
        .bind(node_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
