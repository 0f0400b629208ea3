//! `PgStore`: the durable [`TaskStore`], backed by the repository functions.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRow, NewAccessLog, NewExecutionLog, NewNodeCallRecord, NodeCallRecordRow,
    NodeRecord, NodeStatisticRow, TaskProgress, TaskRow, WorkflowRecord, WorkflowUsageCountRow,
};
use crate::repository::{config, nodes, records, tasks};
use crate::{DbError, DbPool, NodeState, TaskState, TaskStore};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, task: &TaskRow) -> Result<(), DbError> {
        tasks::insert_task(&self.pool, task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskRow, DbError> {
        tasks::get_task(&self.pool, id).await
    }

    async fn tasks_in_state(&self, state: TaskState) -> Result<Vec<TaskRow>, DbError> {
        tasks::tasks_in_state(&self.pool, state.as_str()).await
    }

    async fn update_task_progress(&self, id: Uuid, progress: &TaskProgress) -> Result<(), DbError> {
        tasks::update_task_progress(&self.pool, id, progress).await
    }

    async fn record_node_call(&self, record: &NewNodeCallRecord) -> Result<(), DbError> {
        records::insert_node_call(&self.pool, record).await
    }

    async fn record_execution(&self, log: &NewExecutionLog) -> Result<(), DbError> {
        records::insert_execution_log(&self.pool, log).await
    }

    async fn record_workflow_usage(&self, workflow_id: i64) -> Result<(), DbError> {
        records::insert_workflow_usage(&self.pool, workflow_id).await
    }

    async fn record_access(&self, log: &NewAccessLog) -> Result<(), DbError> {
        records::insert_access_log(&self.pool, log).await
    }

    async fn execution_logs(&self, task_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        records::execution_logs_for_task(&self.pool, task_id).await
    }

    async fn node_call_records(&self, node_id: &str) -> Result<Vec<NodeCallRecordRow>, DbError> {
        records::node_calls_for_node(&self.pool, node_id).await
    }

    async fn node_statistics(&self) -> Result<Vec<NodeStatisticRow>, DbError> {
        records::node_statistics(&self.pool).await
    }

    async fn workflow_usage(&self) -> Result<Vec<WorkflowUsageCountRow>, DbError> {
        records::workflow_usage_counts(&self.pool).await
    }

    async fn sync_config(&self, nodes: &[NodeRecord], workflows: &[WorkflowRecord]) -> Result<(), DbError> {
        config::sync_config(&self.pool, nodes, workflows).await
    }

    async fn update_node_state(&self, node_id: &str, state: NodeState) -> Result<(), DbError> {
        nodes::update_node_state(&self.pool, node_id, state.as_str()).await
    }
}
