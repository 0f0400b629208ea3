//! Task repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{TaskProgress, TaskRow},
    DbError,
};

const TASK_COLUMNS: &str =
    "id, workflow_id, active_step, state, args, emulate, message, created_at, updated_at";

/// Insert a new task row.
pub async fn insert_task(pool: &PgPool, task: &TaskRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO tasks
            (id, workflow_id, active_step, state, args, emulate, message, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(task.id)
    .bind(task.workflow_id)
    .bind(&task.active_step)
    .bind(&task.state)
    .bind(&task.args)
    .bind(task.emulate)
    .bind(&task.message)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single task by its primary key.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<TaskRow, DbError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
    sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return all tasks in the given state, oldest first.
pub async fn tasks_in_state(pool: &PgPool, state: &str) -> Result<Vec<TaskRow>, DbError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE state = $1 ORDER BY created_at ASC");
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(state)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Write state, cursor and message of a task in a single statement.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn update_task_progress(
    pool: &PgPool,
    id: Uuid,
    progress: &TaskProgress,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET state = $1, active_step = $2, message = $3, updated_at = $4
        WHERE id = $5
        "#,
    )
    .bind(progress.state.as_str())
    .bind(&progress.active_step)
    .bind(&progress.message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
