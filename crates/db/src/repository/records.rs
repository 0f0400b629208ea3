//! Append-only telemetry: node call records, execution logs, workflow usage
//! and access logs, plus the aggregate queries built on them.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{
        ExecutionLogRow, NewAccessLog, NewExecutionLog, NewNodeCallRecord, NodeCallRecordRow,
        NodeStatisticRow, WorkflowUsageCountRow,
    },
    DbError,
};

pub async fn insert_node_call(pool: &PgPool, record: &NewNodeCallRecord) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO node_call_records (node_id, endpoint, message, timestamp, duration, outcome)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&record.node_id)
    .bind(&record.endpoint)
    .bind(&record.message)
    .bind(record.timestamp)
    .bind(record.duration)
    .bind(record.outcome.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_execution_log(pool: &PgPool, log: &NewExecutionLog) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO execution_logs (task_id, workflow_id, name, started_at, ended_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(log.task_id)
    .bind(log.workflow_id)
    .bind(&log.name)
    .bind(log.started_at)
    .bind(log.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_workflow_usage(pool: &PgPool, workflow_id: i64) -> Result<(), DbError> {
    sqlx::query("INSERT INTO workflow_usage_records (workflow_id, timestamp) VALUES ($1, $2)")
        .bind(workflow_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn insert_access_log(pool: &PgPool, log: &NewAccessLog) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO access_logs (ip, granted, identifier, path, method, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&log.ip)
    .bind(log.granted)
    .bind(&log.identifier)
    .bind(&log.path)
    .bind(&log.method)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Execution log of one task, in insertion (= step) order.
pub async fn execution_logs_for_task(
    pool: &PgPool,
    task_id: Uuid,
) -> Result<Vec<ExecutionLogRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionLogRow>(
        r#"
        SELECT id, task_id, workflow_id, name, started_at, ended_at
        FROM execution_logs
        WHERE task_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn node_calls_for_node(
    pool: &PgPool,
    node_id: &str,
) -> Result<Vec<NodeCallRecordRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeCallRecordRow>(
        r#"
        SELECT id, node_id, endpoint, message, timestamp, duration, outcome
        FROM node_call_records
        WHERE node_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Call count, duration spread and success rate for every known node.
pub async fn node_statistics(pool: &PgPool) -> Result<Vec<NodeStatisticRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeStatisticRow>(
        r#"
        SELECT
            n.id AS node_id,
            COUNT(c.id) AS call_count,
            AVG(c.duration) AS average_duration,
            MIN(c.duration) AS minimum_duration,
            MAX(c.duration) AS maximum_duration,
            COALESCE(
                SUM(CASE WHEN c.outcome = 'success' THEN 1 ELSE 0 END)::DOUBLE PRECISION
                    / NULLIF(COUNT(c.id), 0),
                0
            )::DOUBLE PRECISION AS success_rate
        FROM nodes n
        LEFT JOIN node_call_records c ON c.node_id = n.id
        GROUP BY n.id
        ORDER BY n.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Number of tasks created per workflow.
pub async fn workflow_usage_counts(pool: &PgPool) -> Result<Vec<WorkflowUsageCountRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowUsageCountRow>(
        r#"
        SELECT w.id AS workflow_id, w.name AS name, COUNT(u.id) AS usage_count
        FROM workflows w
        LEFT JOIN workflow_usage_records u ON u.workflow_id = w.id
        GROUP BY w.id, w.name
        ORDER BY w.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
