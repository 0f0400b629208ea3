//! The `TaskStore` trait: the durability boundary the engine writes through.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRow, NewAccessLog, NewExecutionLog, NewNodeCallRecord, NodeCallRecordRow,
    NodeRecord, NodeStatisticRow, TaskProgress, TaskRow, WorkflowRecord, WorkflowUsageCountRow,
};
use crate::{DbError, NodeState, TaskState};

/// Durable CRUD over tasks and their append-only telemetry.
///
/// `update_task_progress` writes state, cursor and message in one atomic
/// operation; callers rely on it having completed before they move on to
/// the next step.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ------ tasks ------

    async fn insert_task(&self, task: &TaskRow) -> Result<(), DbError>;

    /// # Errors
    /// [`DbError::NotFound`] if no task has this id.
    async fn get_task(&self, id: Uuid) -> Result<TaskRow, DbError>;

    /// Tasks currently in `state`, oldest first.
    async fn tasks_in_state(&self, state: TaskState) -> Result<Vec<TaskRow>, DbError>;

    async fn update_task_progress(&self, id: Uuid, progress: &TaskProgress) -> Result<(), DbError>;

    // ------ append-only records ------

    async fn record_node_call(&self, record: &NewNodeCallRecord) -> Result<(), DbError>;

    async fn record_execution(&self, log: &NewExecutionLog) -> Result<(), DbError>;

    async fn record_workflow_usage(&self, workflow_id: i64) -> Result<(), DbError>;

    async fn record_access(&self, log: &NewAccessLog) -> Result<(), DbError>;

    /// Execution log of one task, in step order.
    async fn execution_logs(&self, task_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError>;

    async fn node_call_records(&self, node_id: &str) -> Result<Vec<NodeCallRecordRow>, DbError>;

    async fn node_statistics(&self) -> Result<Vec<NodeStatisticRow>, DbError>;

    async fn workflow_usage(&self) -> Result<Vec<WorkflowUsageCountRow>, DbError>;

    // ------ configuration mirror ------

    /// Insert or update nodes and workflows, replacing their properties and
    /// steps. All or nothing: on error neither half is written.
    async fn sync_config(&self, nodes: &[NodeRecord], workflows: &[WorkflowRecord]) -> Result<(), DbError>;

    async fn update_node_state(&self, node_id: &str, state: NodeState) -> Result<(), DbError>;
}
