//! Scenario tests for the step executor.
//!
//! Every test drives `StepExecutor` against `MockNode`s and the in-process
//! `MemoryStore`, so no Postgres connection is required. Timing-sensitive
//! tests run on a paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use db::models::{
    ExecutionLogRow, NewAccessLog, NewExecutionLog, NewNodeCallRecord, NodeCallRecordRow,
    NodeRecord, NodeStatisticRow, TaskProgress, TaskRow, WorkflowRecord, WorkflowUsageCountRow,
};
use db::{DbError, MemoryStore, NodeState, TaskState, TaskStore};
use nodes::mock::{mock_factory, MockNode};
use nodes::{NodeOutcome, NodeSpec};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{resume_position, ExecutorConfig, RunOutcome, StepExecutor};
use crate::models::{Step, Task, WorkflowDefinition};
use crate::registry::NodeRegistry;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    registry: Arc<NodeRegistry>,
    nodes: HashMap<String, Arc<MockNode>>,
    workflow: WorkflowDefinition,
}

/// One workflow (id 1, "line") running the given mocks in order.
async fn harness(mocks: Vec<MockNode>) -> Harness {
    let nodes: HashMap<String, Arc<MockNode>> = mocks
        .into_iter()
        .map(|mock| (mock.name.clone(), Arc::new(mock)))
        .collect();
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort();

    let specs: Vec<NodeSpec> = ids.iter().map(|id| NodeSpec::new(*id, *id, "mock")).collect();
    let workflow = WorkflowDefinition {
        id: 1,
        name: "line".into(),
        steps: ids
            .iter()
            .zip(1..)
            .map(|(id, position)| Step {
                node_id: id.to_string(),
                position,
            })
            .collect(),
        acquire_attempts: None,
    };

    let store = Arc::new(MemoryStore::new());
    let registry =
        NodeRegistry::from_specs(&specs, &mock_factory(nodes.clone()), store.clone()).unwrap();
    store
        .sync_config(&registry.records(), &[workflow.to_record()])
        .await
        .unwrap();

    Harness {
        store,
        registry: Arc::new(registry),
        nodes,
        workflow,
    }
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        acquire_attempts: 3,
        acquire_base_delay: Duration::from_millis(100),
        acquire_max_delay: Duration::from_secs(1),
    }
}

/// Delegates to a `MemoryStore` but rejects the first `n` telemetry writes
/// (execution logs and node call records).
struct FlakyTelemetry {
    inner: Arc<MemoryStore>,
    failures_left: AtomicUsize,
}

impl FlakyTelemetry {
    fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn fail_once(&self) -> Result<(), DbError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(DbError::InvalidValue("telemetry table unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyTelemetry {
    async fn insert_task(&self, task: &TaskRow) -> Result<(), DbError> {
        self.inner.insert_task(task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskRow, DbError> {
        self.inner.get_task(id).await
    }

    async fn tasks_in_state(&self, state: TaskState) -> Result<Vec<TaskRow>, DbError> {
        self.inner.tasks_in_state(state).await
    }

    async fn update_task_progress(&self, id: Uuid, progress: &TaskProgress) -> Result<(), DbError> {
        self.inner.update_task_progress(id, progress).await
    }

    async fn record_node_call(&self, record: &NewNodeCallRecord) -> Result<(), DbError> {
        self.fail_once()?;
        self.inner.record_node_call(record).await
    }

    async fn record_execution(&self, log: &NewExecutionLog) -> Result<(), DbError> {
        self.fail_once()?;
        self.inner.record_execution(log).await
    }

    async fn record_workflow_usage(&self, workflow_id: i64) -> Result<(), DbError> {
        self.inner.record_workflow_usage(workflow_id).await
    }

    async fn record_access(&self, log: &NewAccessLog) -> Result<(), DbError> {
        self.inner.record_access(log).await
    }

    async fn execution_logs(&self, task_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        self.inner.execution_logs(task_id).await
    }

    async fn node_call_records(&self, node_id: &str) -> Result<Vec<NodeCallRecordRow>, DbError> {
        self.inner.node_call_records(node_id).await
    }

    async fn node_statistics(&self) -> Result<Vec<NodeStatisticRow>, DbError> {
        self.inner.node_statistics().await
    }

    async fn workflow_usage(&self) -> Result<Vec<WorkflowUsageCountRow>, DbError> {
        self.inner.workflow_usage().await
    }

    async fn sync_config(&self, nodes: &[NodeRecord], workflows: &[WorkflowRecord]) -> Result<(), DbError> {
        self.inner.sync_config(nodes, workflows).await
    }

    async fn update_node_state(&self, node_id: &str, state: NodeState) -> Result<(), DbError> {
        self.inner.update_node_state(node_id, state).await
    }
}

impl Harness {
    fn executor(&self) -> StepExecutor {
        StepExecutor::new(self.store.clone(), Arc::clone(&self.registry), config())
    }

    async fn new_task(&self, emulate: bool) -> Uuid {
        let task = Task::new(self.workflow.id, json!({ "sample": "S-17" }), emulate);
        self.store.insert_task(&task.to_row()).await.unwrap();
        task.id
    }

    async fn task(&self, id: Uuid) -> Task {
        Task::try_from(self.store.get_task(id).await.unwrap()).unwrap()
    }

    async fn run(&self, id: Uuid) -> RunOutcome {
        self.executor()
            .run(id, &self.workflow, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn node_state(&self, id: &str) -> NodeState {
        self.registry.get(id).unwrap().state
    }
}

// ============================================================
// Happy path
// ============================================================

#[tokio::test(start_paused = true)]
async fn linear_workflow_walks_the_cursor_to_finished() {
    let h = harness(vec![
        MockNode::succeeding("node-1").with_delay(Duration::from_secs(10)),
        MockNode::succeeding("node-2"),
    ])
    .await;
    let id = h.new_task(false).await;

    let executor = h.executor();
    let workflow = h.workflow.clone();
    let handle = tokio::spawn(async move {
        executor
            .run(id, &workflow, &CancellationToken::new())
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let midway = h.task(id).await;
    assert_eq!(midway.state, TaskState::Active);
    assert_eq!(midway.active_step.as_deref(), Some("node-1"));
    assert_eq!(h.node_state("node-1"), NodeState::InUse);

    assert!(matches!(handle.await.unwrap(), RunOutcome::Finished));
    let done = h.task(id).await;
    assert_eq!(done.state, TaskState::Finished);
    assert!(done.active_step.is_none());
    assert!(done.message.is_none());

    let first = &h.nodes["node-1"].calls()[0];
    assert_eq!(first.source, None);
    assert_eq!(first.destination.as_deref(), Some("node-2"));
    assert_eq!(first.args, json!({ "sample": "S-17" }));
    let second = &h.nodes["node-2"].calls()[0];
    assert_eq!(second.source.as_deref(), Some("node-1"));
    assert_eq!(second.destination, None);

    let logs = h.store.execution_logs(id).await.unwrap();
    let names: Vec<&str> = logs.iter().map(|log| log.name.as_str()).collect();
    assert_eq!(names, ["node-1", "node-2"]);
    assert!(logs.iter().all(|log| log.ended_at >= log.started_at));

    for node in ["node-1", "node-2"] {
        let calls = h.store.node_call_records(node).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].outcome, "success");
        assert_eq!(h.node_state(node), NodeState::Available);
    }
}

// ============================================================
// Failure and continuation
// ============================================================

#[tokio::test]
async fn failed_step_keeps_the_cursor_and_continuation_reruns_only_it() {
    let h = harness(vec![
        MockNode::succeeding("node-1"),
        MockNode::with_outcomes("node-2", [NodeOutcome::failure(1, "timeout")]),
    ])
    .await;
    let id = h.new_task(false).await;

    match h.run(id).await {
        RunOutcome::Failed(EngineError::StepExecutionFailed { node_id, code, .. }) => {
            assert_eq!(node_id, "node-2");
            assert_eq!(code, 1);
        }
        other => panic!("expected step failure, got {other:?}"),
    }

    let failed = h.task(id).await;
    assert_eq!(failed.state, TaskState::Error);
    assert_eq!(failed.active_step.as_deref(), Some("node-2"));
    assert_eq!(failed.message.as_deref(), Some("timeout"));
    assert_eq!(h.node_state("node-2"), NodeState::Error);
    assert_eq!(h.store.node_call_records("node-2").await.unwrap()[0].outcome, "error");

    assert_eq!(h.registry.restart("node-2").await.unwrap(), NodeState::Available);
    assert!(matches!(h.run(id).await, RunOutcome::Finished));

    assert_eq!(h.nodes["node-1"].call_count(), 1);
    assert_eq!(h.nodes["node-2"].call_count(), 2);
    let done = h.task(id).await;
    assert_eq!(done.state, TaskState::Finished);
    assert!(done.message.is_none());
    assert_eq!(h.store.execution_logs(id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn lost_telemetry_never_makes_a_completed_step_run_again() {
    let h = harness(vec![
        MockNode::succeeding("node-1"),
        MockNode::with_outcomes("node-2", [NodeOutcome::failure(4, "lid open")]),
    ])
    .await;
    let id = h.new_task(false).await;

    // The call record and execution log of node-1 are both rejected.
    let flaky = Arc::new(FlakyTelemetry::new(h.store.clone(), 2));
    let executor = StepExecutor::new(flaky, Arc::clone(&h.registry), config());
    let outcome = executor
        .run(id, &h.workflow, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(EngineError::StepExecutionFailed { .. })));

    let failed = h.task(id).await;
    assert_eq!(failed.state, TaskState::Error);
    assert_eq!(failed.active_step.as_deref(), Some("node-2"));
    assert!(h.store.node_call_records("node-1").await.unwrap().is_empty());

    h.registry.restart("node-2").await.unwrap();
    assert!(matches!(h.run(id).await, RunOutcome::Finished));
    assert_eq!(h.nodes["node-1"].call_count(), 1);
    assert_eq!(h.nodes["node-2"].call_count(), 2);

    let names: Vec<String> = h
        .store
        .execution_logs(id)
        .await
        .unwrap()
        .into_iter()
        .map(|log| log.name)
        .collect();
    assert_eq!(names, ["node-2", "node-2"]);
}

#[tokio::test]
async fn finished_task_cannot_run_again() {
    let h = harness(vec![MockNode::succeeding("node-1")]).await;
    let id = h.new_task(false).await;
    assert!(matches!(h.run(id).await, RunOutcome::Finished));

    let err = h
        .executor()
        .run(id, &h.workflow, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TaskNotResumable { state: TaskState::Finished, .. }));
    assert_eq!(h.nodes["node-1"].call_count(), 1);
}

#[tokio::test]
async fn unknown_task_is_reported() {
    let h = harness(vec![MockNode::succeeding("node-1")]).await;
    let ghost = Uuid::new_v4();
    let err = h
        .executor()
        .run(ghost, &h.workflow, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound(id) if id == ghost));
}

// ============================================================
// Acquisition back-off
// ============================================================

#[tokio::test(start_paused = true)]
async fn busy_node_exhausts_the_retry_ceiling() {
    let h = harness(vec![MockNode::succeeding("node-1"), MockNode::succeeding("node-2")]).await;
    h.registry.acquire("node-1", Uuid::new_v4()).await.unwrap();
    let id = h.new_task(false).await;

    let started = tokio::time::Instant::now();
    let outcome = h.run(id).await;
    // Three attempts: back-off after the first two (100ms, 200ms).
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(400));
    assert!(matches!(outcome, RunOutcome::Failed(EngineError::NodeUnavailable(ref n)) if n == "node-1"));

    let task = h.task(id).await;
    assert_eq!(task.state, TaskState::Error);
    assert_eq!(task.active_step.as_deref(), Some("node-1"));
    assert!(task.message.unwrap().contains("unavailable"));
    assert_eq!(h.nodes["node-1"].call_count(), 0);
    assert!(h.store.execution_logs(id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn workflow_override_replaces_the_global_ceiling() {
    let mut h = harness(vec![MockNode::succeeding("node-1")]).await;
    h.workflow.acquire_attempts = Some(1);
    h.registry.acquire("node-1", Uuid::new_v4()).await.unwrap();
    let id = h.new_task(false).await;

    let started = tokio::time::Instant::now();
    assert!(matches!(h.run(id).await, RunOutcome::Failed(EngineError::NodeUnavailable(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn node_freed_during_backoff_is_picked_up() {
    let h = harness(vec![MockNode::succeeding("node-1")]).await;
    let holder = Uuid::new_v4();
    h.registry.acquire("node-1", holder).await.unwrap();
    let id = h.new_task(false).await;

    let executor = h.executor();
    let workflow = h.workflow.clone();
    let handle = tokio::spawn(async move {
        executor
            .run(id, &workflow, &CancellationToken::new())
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.registry.release("node-1", holder, &NodeOutcome::success()).await;

    assert!(matches!(handle.await.unwrap(), RunOutcome::Finished));
    assert_eq!(h.nodes["node-1"].call_count(), 1);

    let names: Vec<String> = h
        .store
        .execution_logs(id)
        .await
        .unwrap()
        .into_iter()
        .map(|log| log.name)
        .collect();
    assert_eq!(names, ["wait:node-1", "node-1"]);
}

#[test]
fn backoff_doubles_and_is_capped() {
    let config = ExecutorConfig {
        acquire_attempts: 10,
        acquire_base_delay: Duration::from_millis(200),
        acquire_max_delay: Duration::from_secs(5),
    };
    assert_eq!(config.backoff(1), Duration::from_millis(200));
    assert_eq!(config.backoff(2), Duration::from_millis(400));
    assert_eq!(config.backoff(3), Duration::from_millis(800));
    assert_eq!(config.backoff(6), Duration::from_secs(5));
    assert_eq!(config.backoff(64), Duration::from_secs(5));
}

// ============================================================
// Emulate mode
// ============================================================

#[tokio::test]
async fn emulated_task_logs_steps_without_calling_nodes() {
    let h = harness(vec![MockNode::succeeding("node-1"), MockNode::succeeding("node-2")]).await;
    let id = h.new_task(true).await;

    assert!(matches!(h.run(id).await, RunOutcome::Finished));

    assert_eq!(h.store.execution_logs(id).await.unwrap().len(), 2);
    for node in ["node-1", "node-2"] {
        assert_eq!(h.nodes[node].call_count(), 0);
        assert!(h.store.node_call_records(node).await.unwrap().is_empty());
        assert_eq!(h.node_state(node), NodeState::Available);
    }
}

#[tokio::test]
async fn emulated_task_still_needs_its_nodes() {
    let h = harness(vec![MockNode::succeeding("node-1")]).await;
    h.registry.acquire("node-1", Uuid::new_v4()).await.unwrap();
    let id = h.new_task(true).await;

    let executor = StepExecutor::new(
        h.store.clone(),
        Arc::clone(&h.registry),
        ExecutorConfig {
            acquire_attempts: 1,
            ..config()
        },
    );
    let outcome = executor
        .run(id, &h.workflow, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(EngineError::NodeUnavailable(_))));
}

// ============================================================
// Pausing
// ============================================================

#[tokio::test]
async fn cancelled_before_the_first_step_pauses_there() {
    let h = harness(vec![MockNode::succeeding("node-1"), MockNode::succeeding("node-2")]).await;
    let id = h.new_task(false).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.executor().run(id, &h.workflow, &cancel).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Paused));

    let task = h.task(id).await;
    assert_eq!(task.state, TaskState::Paused);
    assert_eq!(task.active_step.as_deref(), Some("node-1"));
    assert_eq!(h.nodes["node-1"].call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn pause_waits_for_the_inflight_step_then_resumes_after_it() {
    let h = harness(vec![
        MockNode::succeeding("node-1").with_delay(Duration::from_secs(10)),
        MockNode::succeeding("node-2"),
    ])
    .await;
    let id = h.new_task(false).await;

    let cancel = CancellationToken::new();
    let executor = h.executor();
    let workflow = h.workflow.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { executor.run(id, &workflow, &token).await.unwrap() });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    assert!(matches!(handle.await.unwrap(), RunOutcome::Paused));

    let paused = h.task(id).await;
    assert_eq!(paused.state, TaskState::Paused);
    assert_eq!(paused.active_step.as_deref(), Some("node-2"));
    assert_eq!(h.nodes["node-1"].call_count(), 1);
    assert_eq!(h.nodes["node-2"].call_count(), 0);
    assert_eq!(h.node_state("node-1"), NodeState::Available);

    assert!(matches!(h.run(id).await, RunOutcome::Finished));
    assert_eq!(h.nodes["node-1"].call_count(), 1);
    assert_eq!(h.nodes["node-2"].call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_backoff_wait() {
    let h = harness(vec![MockNode::succeeding("node-1")]).await;
    h.registry.acquire("node-1", Uuid::new_v4()).await.unwrap();
    let id = h.new_task(false).await;

    let cancel = CancellationToken::new();
    let executor = h.executor();
    let workflow = h.workflow.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { executor.run(id, &workflow, &token).await.unwrap() });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    assert!(matches!(handle.await.unwrap(), RunOutcome::Paused));
    assert_eq!(h.task(id).await.active_step.as_deref(), Some("node-1"));
}

// ============================================================
// Exclusivity
// ============================================================

#[tokio::test(start_paused = true)]
async fn tasks_sharing_a_node_take_turns() {
    let h = harness(vec![MockNode::succeeding("node-1").with_delay(Duration::from_millis(50))]).await;
    let first = h.new_task(false).await;
    let second = h.new_task(false).await;

    let executor = Arc::new(StepExecutor::new(
        h.store.clone(),
        Arc::clone(&h.registry),
        ExecutorConfig {
            acquire_attempts: 10,
            acquire_base_delay: Duration::from_millis(10),
            acquire_max_delay: Duration::from_secs(1),
        },
    ));
    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|id| {
            let executor = Arc::clone(&executor);
            let workflow = h.workflow.clone();
            tokio::spawn(async move {
                executor
                    .run(id, &workflow, &CancellationToken::new())
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(handle.await.unwrap(), RunOutcome::Finished));
    }
    assert_eq!(h.nodes["node-1"].call_count(), 2);
    assert_eq!(h.nodes["node-1"].max_in_flight(), 1);
}

// ============================================================
// Resume position
// ============================================================

#[tokio::test]
async fn resume_position_follows_the_cursor() {
    let h = harness(vec![
        MockNode::succeeding("node-1"),
        MockNode::succeeding("node-2"),
        MockNode::succeeding("node-3"),
    ])
    .await;
    let mut task = Task::new(1, json!({}), false);
    assert_eq!(resume_position(&task, &h.workflow).unwrap(), 0);

    task.active_step = Some("node-3".into());
    assert_eq!(resume_position(&task, &h.workflow).unwrap(), 2);

    task.active_step = Some("node-9".into());
    assert!(matches!(
        resume_position(&task, &h.workflow),
        Err(EngineError::InconsistentTask { .. })
    ));

    task.active_step = None;
    task.workflow_id = 2;
    assert!(matches!(
        resume_position(&task, &h.workflow),
        Err(EngineError::InconsistentTask { .. })
    ));
}
