//! `MemoryStore`: a process-local [`TaskStore`].
//!
//! Mirrors the foreign keys of the SQL schema so that tests exercise the
//! same referential rules as Postgres. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{
    AccessLogRow, ExecutionLogRow, NewAccessLog, NewExecutionLog, NewNodeCallRecord,
    NodeCallRecordRow, NodeRecord, NodeRow, NodeStatisticRow, TaskProgress, TaskRow,
    WorkflowRecord, WorkflowUsageCountRow, WorkflowUsageRow,
};
use crate::{DbError, NodeState, TaskState, TaskStore};

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, TaskRow>,
    nodes: BTreeMap<String, (NodeRow, BTreeMap<String, String>)>,
    workflows: BTreeMap<i64, WorkflowRecord>,
    node_calls: Vec<NodeCallRecordRow>,
    execution_logs: Vec<ExecutionLogRow>,
    usage: Vec<WorkflowUsageRow>,
    access: Vec<AccessLogRow>,
}

impl Inner {
    fn require_node(&self, node_id: &str) -> Result<(), DbError> {
        if self.nodes.contains_key(node_id) {
            Ok(())
        } else {
            Err(DbError::ForeignKey(format!("node '{node_id}' does not exist")))
        }
    }

    fn require_workflow(&self, workflow_id: i64) -> Result<(), DbError> {
        if self.workflows.contains_key(&workflow_id) {
            Ok(())
        } else {
            Err(DbError::ForeignKey(format!("workflow {workflow_id} does not exist")))
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted state of a node, if the node was ever synced.
    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        let inner = self.inner.lock();
        inner
            .nodes
            .get(node_id)
            .and_then(|(row, _)| row.state.parse().ok())
    }

    pub fn node_properties(&self, node_id: &str) -> Option<BTreeMap<String, String>> {
        self.inner.lock().nodes.get(node_id).map(|(_, props)| props.clone())
    }

    pub fn workflow(&self, workflow_id: i64) -> Option<WorkflowRecord> {
        self.inner.lock().workflows.get(&workflow_id).cloned()
    }

    /// Every node call record, across all nodes.
    pub fn all_node_calls(&self) -> Vec<NodeCallRecordRow> {
        self.inner.lock().node_calls.clone()
    }

    pub fn access_logs(&self) -> Vec<AccessLogRow> {
        self.inner.lock().access.clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &TaskRow) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.require_workflow(task.workflow_id)?;
        if let Some(step) = &task.active_step {
            inner.require_node(step)?;
        }
        task.state()?;
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskRow, DbError> {
        self.inner.lock().tasks.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn tasks_in_state(&self, state: TaskState) -> Result<Vec<TaskRow>, DbError> {
        let inner = self.inner.lock();
        let mut rows: Vec<TaskRow> = inner
            .tasks
            .values()
            .filter(|task| task.state == state.as_str())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn update_task_progress(&self, id: Uuid, progress: &TaskProgress) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        if let Some(step) = &progress.active_step {
            inner.require_node(step)?;
        }
        let task = inner.tasks.get_mut(&id).ok_or(DbError::NotFound)?;
        task.state = progress.state.as_str().to_owned();
        task.active_step = progress.active_step.clone();
        task.message = progress.message.clone();
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn record_node_call(&self, record: &NewNodeCallRecord) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.require_node(&record.node_id)?;
        let id = inner.node_calls.len() as i64 + 1;
        inner.node_calls.push(NodeCallRecordRow {
            id,
            node_id: record.node_id.clone(),
            endpoint: record.endpoint.clone(),
            message: record.message.clone(),
            timestamp: record.timestamp,
            duration: record.duration,
            outcome: record.outcome.as_str().to_owned(),
        });
        Ok(())
    }

    async fn record_execution(&self, log: &NewExecutionLog) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.require_workflow(log.workflow_id)?;
        if !inner.tasks.contains_key(&log.task_id) {
            return Err(DbError::ForeignKey(format!("task {} does not exist", log.task_id)));
        }
        let id = inner.execution_logs.len() as i64 + 1;
        inner.execution_logs.push(ExecutionLogRow {
            id,
            task_id: log.task_id,
            workflow_id: log.workflow_id,
            name: log.name.clone(),
            started_at: log.started_at,
            ended_at: log.ended_at,
        });
        Ok(())
    }

    async fn record_workflow_usage(&self, workflow_id: i64) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.require_workflow(workflow_id)?;
        let id = inner.usage.len() as i64 + 1;
        inner.usage.push(WorkflowUsageRow {
            id,
            workflow_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn record_access(&self, log: &NewAccessLog) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        let id = inner.access.len() as i64 + 1;
        inner.access.push(AccessLogRow {
            id,
            ip: log.ip.clone(),
            granted: log.granted,
            identifier: log.identifier.clone(),
            path: log.path.clone(),
            method: log.method.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn execution_logs(&self, task_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        let inner = self.inner.lock();
        Ok(inner
            .execution_logs
            .iter()
            .filter(|log| log.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn node_call_records(&self, node_id: &str) -> Result<Vec<NodeCallRecordRow>, DbError> {
        let inner = self.inner.lock();
        Ok(inner
            .node_calls
            .iter()
            .filter(|call| call.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn node_statistics(&self) -> Result<Vec<NodeStatisticRow>, DbError> {
        let inner = self.inner.lock();
        let stats = inner
            .nodes
            .keys()
            .map(|node_id| {
                let durations: Vec<(f64, bool)> = inner
                    .node_calls
                    .iter()
                    .filter(|call| &call.node_id == node_id)
                    .map(|call| (call.duration, call.outcome == "success"))
                    .collect();
                let count = durations.len();
                let successes = durations.iter().filter(|(_, ok)| *ok).count();
                let sum: f64 = durations.iter().map(|(d, _)| d).sum();

                NodeStatisticRow {
                    node_id: node_id.clone(),
                    call_count: count as i64,
                    average_duration: (count > 0).then(|| sum / count as f64),
                    minimum_duration: durations.iter().map(|(d, _)| *d).reduce(f64::min),
                    maximum_duration: durations.iter().map(|(d, _)| *d).reduce(f64::max),
                    success_rate: if count == 0 {
                        0.0
                    } else {
                        successes as f64 / count as f64
                    },
                }
            })
            .collect();
        Ok(stats)
    }

    async fn workflow_usage(&self) -> Result<Vec<WorkflowUsageCountRow>, DbError> {
        let inner = self.inner.lock();
        Ok(inner
            .workflows
            .values()
            .map(|record| WorkflowUsageCountRow {
                workflow_id: record.workflow.id,
                name: record.workflow.name.clone(),
                usage_count: inner
                    .usage
                    .iter()
                    .filter(|u| u.workflow_id == record.workflow.id)
                    .count() as i64,
            })
            .collect())
    }

    async fn sync_config(&self, nodes: &[NodeRecord], workflows: &[WorkflowRecord]) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        // Check every reference against the merged node set before writing,
        // so a rejected sync leaves no partial writes.
        let known = |node_id: &str| {
            inner.nodes.contains_key(node_id) || nodes.iter().any(|node| node.id == node_id)
        };
        for record in workflows {
            let references = [
                &record.workflow.source_node_id,
                &record.workflow.destination_node_id,
            ]
            .into_iter()
            .chain(record.steps.iter().map(|step| &step.node_id));
            for node_id in references {
                if !known(node_id) {
                    return Err(DbError::ForeignKey(format!("node '{node_id}' does not exist")));
                }
            }
        }

        let now = Utc::now();
        for node in nodes {
            let row = NodeRow {
                id: node.id.clone(),
                name: node.name.clone(),
                kind: node.kind.clone(),
                state: node.state.as_str().to_owned(),
                updated_at: now,
            };
            inner
                .nodes
                .insert(node.id.clone(), (row, node.properties.clone()));
        }
        for record in workflows {
            inner.workflows.insert(record.workflow.id, record.clone());
        }
        Ok(())
    }

    async fn update_node_state(&self, node_id: &str, state: NodeState) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        let (row, _) = inner.nodes.get_mut(node_id).ok_or(DbError::NotFound)?;
        row.state = state.as_str().to_owned();
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallOutcome, StepRow, WorkflowRow};
    use serde_json::json;

    fn node(id: &str) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            name: id.to_uppercase(),
            kind: "noop".into(),
            state: NodeState::Available,
            properties: BTreeMap::new(),
        }
    }

    fn workflow(id: i64, steps: &[&str]) -> WorkflowRecord {
        WorkflowRecord {
            workflow: WorkflowRow {
                id,
                name: format!("wf-{id}"),
                source_node_id: steps[0].into(),
                destination_node_id: steps[steps.len() - 1].into(),
            },
            steps: steps
                .iter()
                .enumerate()
                .map(|(i, n)| StepRow {
                    workflow_id: id,
                    node_id: (*n).into(),
                    position: i as i32,
                })
                .collect(),
        }
    }

    fn task(workflow_id: i64) -> TaskRow {
        let now = Utc::now();
        TaskRow {
            id: Uuid::new_v4(),
            workflow_id,
            active_step: None,
            state: TaskState::Pending.to_string(),
            args: json!({ "plate": 1 }),
            emulate: false,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .sync_config(&[node("a"), node("b")], &[workflow(1, &["a", "b"])])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn task_for_unknown_workflow_is_rejected() {
        let store = seeded().await;
        assert!(matches!(
            store.insert_task(&task(99)).await,
            Err(DbError::ForeignKey(_))
        ));
    }

    #[tokio::test]
    async fn progress_updates_state_cursor_and_message_together() {
        let store = seeded().await;
        let row = task(1);
        store.insert_task(&row).await.unwrap();

        let progress = TaskProgress {
            state: TaskState::Error,
            active_step: Some("b".into()),
            message: Some("timeout".into()),
        };
        store.update_task_progress(row.id, &progress).await.unwrap();

        let stored = store.get_task(row.id).await.unwrap();
        assert_eq!(stored.state().unwrap(), TaskState::Error);
        assert_eq!(stored.active_step.as_deref(), Some("b"));
        assert_eq!(stored.message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn progress_for_missing_task_is_not_found() {
        let store = seeded().await;
        let progress = TaskProgress {
            state: TaskState::Active,
            active_step: None,
            message: None,
        };
        assert!(matches!(
            store.update_task_progress(Uuid::new_v4(), &progress).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn tasks_in_state_filters() {
        let store = seeded().await;
        let pending = task(1);
        let active = task(1);
        store.insert_task(&pending).await.unwrap();
        store.insert_task(&active).await.unwrap();
        store
            .update_task_progress(
                active.id,
                &TaskProgress {
                    state: TaskState::Active,
                    active_step: Some("a".into()),
                    message: None,
                },
            )
            .await
            .unwrap();

        let rows = store.tasks_in_state(TaskState::Active).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, active.id);
    }

    #[tokio::test]
    async fn config_sync_with_unknown_node_writes_nothing() {
        let store = seeded().await;
        let result = store
            .sync_config(&[node("c")], &[workflow(2, &["a", "c"]), workflow(3, &["ghost"])])
            .await;
        assert!(matches!(result, Err(DbError::ForeignKey(_))));
        assert!(store.workflow(2).is_none());
        assert!(store.node_state("c").is_none());
    }

    #[tokio::test]
    async fn config_sync_accepts_new_nodes_referenced_in_the_same_call() {
        let store = seeded().await;
        store
            .sync_config(&[node("c")], &[workflow(2, &["b", "c"])])
            .await
            .unwrap();
        assert_eq!(store.node_state("c"), Some(NodeState::Available));
        assert_eq!(store.workflow(2).unwrap().steps.len(), 2);
    }

    #[tokio::test]
    async fn workflow_name_can_move_to_a_new_id() {
        let store = seeded().await;
        let row = task(1);
        store.insert_task(&row).await.unwrap();

        let mut moved = workflow(2, &["b", "a"]);
        moved.workflow.name = "wf-1".into();
        store.sync_config(&[], &[moved]).await.unwrap();

        assert_eq!(store.workflow(2).unwrap().workflow.name, "wf-1");
        assert_eq!(store.workflow(1).unwrap().workflow.name, "wf-1");
        assert_eq!(store.get_task(row.id).await.unwrap().workflow_id, 1);
    }

    #[tokio::test]
    async fn statistics_aggregate_call_records() {
        let store = seeded().await;
        for (duration, outcome) in [(1.0, CallOutcome::Success), (3.0, CallOutcome::Error)] {
            store
                .record_node_call(&NewNodeCallRecord {
                    node_id: "a".into(),
                    endpoint: None,
                    message: None,
                    timestamp: Utc::now(),
                    duration,
                    outcome,
                })
                .await
                .unwrap();
        }
        store.record_workflow_usage(1).await.unwrap();

        let stats = store.node_statistics().await.unwrap();
        let a = stats.iter().find(|s| s.node_id == "a").unwrap();
        assert_eq!(a.call_count, 2);
        assert_eq!(a.average_duration, Some(2.0));
        assert_eq!(a.minimum_duration, Some(1.0));
        assert_eq!(a.maximum_duration, Some(3.0));
        assert_eq!(a.success_rate, 0.5);

        let b = stats.iter().find(|s| s.node_id == "b").unwrap();
        assert_eq!(b.call_count, 0);
        assert_eq!(b.average_duration, None);

        let usage = store.workflow_usage().await.unwrap();
        assert_eq!(usage[0].usage_count, 1);
    }

    #[test]
    fn state_names_round_trip_through_strings() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert_eq!("IN_USE".parse::<NodeState>().unwrap(), NodeState::InUse);
        assert!("SLEEPING".parse::<NodeState>().is_err());
    }
}
