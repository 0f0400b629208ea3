//! `Orchestrator`: process-wide lifecycle, task submission, and control.
//!
//! One orchestrator exists per process. While running it owns a [`Runtime`]
//! (node registry + validated workflows + probe loop). `start` builds it,
//! `stop` drains tasks and drops it, `reload` swaps it for a fresh one when
//! no task is running.
//!
//! Running tasks are tracked by id with a cancellation token. The id is
//! reserved in that map *before* the worker is spawned, so a task can never
//! be executing twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use db::models::{ExecutionLogRow, NodeStatisticRow, TaskProgress, WorkflowUsageCountRow};
use db::{DbError, TaskState, TaskStore};
use nodes::{NodeFactory, NodeSpec};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{load_node_specs, load_workflow_specs, WorkflowSpec};
use crate::executor::{ExecutorConfig, RunOutcome, StepExecutor};
use crate::models::{Task, WorkflowDefinition};
use crate::registry::{NodeRegistry, NodeSnapshot};
use crate::validate::build_workflows;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Settings and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub nodes_path: PathBuf,
    pub workflows_path: PathBuf,
    /// Force every task into emulate mode.
    pub emulate: bool,
    pub executor: ExecutorConfig,
    /// Period of the background reachability probe. Zero disables it.
    pub probe_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            nodes_path: PathBuf::from("./config/nodes.json"),
            workflows_path: PathBuf::from("./config/workflows.json"),
            emulate: false,
            executor: ExecutorConfig::default(),
            probe_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Stopped,
    Running,
    /// The last start attempt failed.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub emulate: bool,
    pub running_tasks: Vec<Uuid>,
    pub workflows: usize,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub node: NodeSnapshot,
    /// What the node said when asked just now.
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub nodes: Vec<NodeStatisticRow>,
    pub workflows: Vec<WorkflowUsageCountRow>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

struct Runtime {
    registry: Arc<NodeRegistry>,
    workflows: Vec<Arc<WorkflowDefinition>>,
    probe_cancel: CancellationToken,
}

impl Runtime {
    fn by_name(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.iter().find(|w| w.name == name).cloned()
    }

    fn by_id(&self, id: i64) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.iter().find(|w| w.id == id).cloned()
    }
}

type RunningTasks = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<dyn TaskStore>,
    factory: NodeFactory,
    runtime: RwLock<Option<Arc<Runtime>>>,
    state: Mutex<OrchestratorState>,
    running: RunningTasks,
    tracker: TaskTracker,
    /// Serializes start/stop/reload and task launches against them.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings, store: Arc<dyn TaskStore>, factory: NodeFactory) -> Self {
        Self {
            settings,
            store,
            factory,
            runtime: RwLock::new(None),
            state: Mutex::new(OrchestratorState::Stopped),
            running: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load configuration from disk, activate it, and relaunch tasks that
    /// were interrupted by a previous process exit.
    pub async fn start(&self) -> Result<(), EngineError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.runtime.read().is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let loaded = match self.load_from_disk() {
            Ok((nodes, workflows)) => self.activate(nodes, workflows).await,
            Err(err) => Err(err),
        };
        let runtime = match loaded {
            Ok(runtime) => runtime,
            Err(err) => {
                *self.state.lock() = OrchestratorState::Error;
                error!(error = %err, "orchestrator failed to start");
                return Err(err);
            }
        };

        if self.settings.emulate {
            warn!("EMULATE MODE: node calls are skipped for every task");
        }

        self.tracker.reopen();
        *self.runtime.write() = Some(Arc::clone(&runtime));
        *self.state.lock() = OrchestratorState::Running;
        info!(
            nodes = runtime.registry.snapshot().len(),
            workflows = runtime.workflows.len(),
            "orchestrator started"
        );

        self.recover_interrupted(&runtime).await
    }

    /// Stop accepting work, pause running tasks at their next step boundary,
    /// wait for them, then shut the nodes down.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(runtime) = self.runtime.write().take() else {
            return Err(EngineError::AlreadyStopped);
        };

        let draining: Vec<CancellationToken> = self.running.lock().values().cloned().collect();
        info!(tasks = draining.len(), "stopping orchestrator");
        for cancel in &draining {
            cancel.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;

        runtime.probe_cancel.cancel();
        runtime.registry.shutdown_all().await;
        *self.state.lock() = OrchestratorState::Stopped;
        info!("orchestrator stopped");
        Ok(())
    }

    pub fn status(&self) -> OrchestratorStatus {
        let runtime = self.runtime.read().clone();
        let mut running_tasks: Vec<Uuid> = self.running.lock().keys().copied().collect();
        running_tasks.sort();
        OrchestratorStatus {
            state: *self.state.lock(),
            emulate: self.settings.emulate,
            running_tasks,
            workflows: runtime.as_ref().map_or(0, |r| r.workflows.len()),
            nodes: runtime.map(|r| r.registry.snapshot()).unwrap_or_default(),
        }
    }

    /// Replace nodes and workflows. Omitted halves are re-read from disk.
    /// Any validation failure leaves the active configuration untouched.
    pub async fn reload(
        &self,
        nodes: Option<Vec<NodeSpec>>,
        workflows: Option<Vec<WorkflowSpec>>,
    ) -> Result<(), EngineError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.runtime()?;
        let busy = self.running.lock().len();
        if busy > 0 {
            return Err(EngineError::ReloadWhileRunning(busy));
        }

        let nodes = match nodes {
            Some(nodes) => nodes,
            None => load_node_specs(&self.settings.nodes_path)?,
        };
        let workflows = match workflows {
            Some(workflows) => workflows,
            None => load_workflow_specs(&self.settings.workflows_path)?,
        };

        let fresh = match self.activate(nodes, workflows).await {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "reload rejected, keeping current configuration");
                return Err(err);
            }
        };
        current.probe_cancel.cancel();
        info!(
            nodes = fresh.registry.snapshot().len(),
            workflows = fresh.workflows.len(),
            "configuration reloaded"
        );
        *self.runtime.write() = Some(fresh);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Persist a new task for `workflow_name` and start it in the background.
    pub async fn create_task(
        &self,
        workflow_name: &str,
        args: Value,
        emulate: bool,
    ) -> Result<Task, EngineError> {
        let _lifecycle = self.lifecycle.lock().await;
        let runtime = self.runtime()?;
        let workflow = runtime
            .by_name(workflow_name)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_owned()))?;

        let task = Task::new(workflow.id, args, emulate || self.settings.emulate);
        self.store.insert_task(&task.to_row()).await?;
        self.store.record_workflow_usage(workflow.id).await?;
        info!(task_id = %task.id, workflow = %workflow.name, emulate = task.emulate, "task created");

        let cancel = self.reserve(task.id)?;
        self.spawn(&runtime, workflow, task.id, cancel);
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, EngineError> {
        let row = self.store.get_task(task_id).await.map_err(|err| match err {
            DbError::NotFound => EngineError::TaskNotFound(task_id),
            other => other.into(),
        })?;
        Ok(Task::try_from(row)?)
    }

    /// Resume a paused or failed task from its cursor. Nodes of the workflow
    /// that are in `ERROR` are restarted first.
    pub async fn continue_task(&self, task_id: Uuid) -> Result<Task, EngineError> {
        let _lifecycle = self.lifecycle.lock().await;
        let runtime = self.runtime()?;
        let cancel = self.reserve(task_id)?;

        match self.prepare_continuation(&runtime, task_id).await {
            Ok((task, workflow)) => {
                info!(%task_id, from = ?task.active_step, "task continued");
                self.spawn(&runtime, workflow, task_id, cancel);
                Ok(task)
            }
            Err(err) => {
                self.running.lock().remove(&task_id);
                Err(err)
            }
        }
    }

    /// Ask a running task to pause at its next step boundary.
    pub fn pause_task(&self, task_id: Uuid) -> Result<(), EngineError> {
        let running = self.running.lock();
        let cancel = running
            .get(&task_id)
            .ok_or(EngineError::TaskNotRunning(task_id))?;
        cancel.cancel();
        info!(%task_id, "pause requested");
        Ok(())
    }

    /// Tasks whose persisted state is `ACTIVE`.
    pub async fn list_running(&self) -> Result<Vec<Task>, EngineError> {
        let rows = self.store.tasks_in_state(TaskState::Active).await?;
        let tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub async fn timeline(&self, task_id: Uuid) -> Result<Vec<ExecutionLogRow>, EngineError> {
        self.get_task(task_id).await?;
        Ok(self.store.execution_logs(task_id).await?)
    }

    // -----------------------------------------------------------------------
    // Nodes and workflows
    // -----------------------------------------------------------------------

    pub async fn restart_node(&self, node_id: &str) -> Result<NodeSnapshot, EngineError> {
        let runtime = self.runtime()?;
        runtime.registry.restart(node_id).await?;
        runtime.registry.get(node_id)
    }

    pub async fn node_status(&self, node_id: &str) -> Result<NodeStatus, EngineError> {
        let runtime = self.runtime()?;
        let node = runtime.registry.get(node_id)?;
        let online = runtime.registry.is_reachable(node_id).await?;
        Ok(NodeStatus { node, online })
    }

    pub fn nodes(&self) -> Result<Vec<NodeSnapshot>, EngineError> {
        Ok(self.runtime()?.registry.snapshot())
    }

    pub fn workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self
            .runtime()?
            .workflows
            .iter()
            .map(|w| w.as_ref().clone())
            .collect())
    }

    pub async fn statistics(&self) -> Result<Statistics, EngineError> {
        Ok(Statistics {
            nodes: self.store.node_statistics().await?,
            workflows: self.store.workflow_usage().await?,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn runtime(&self) -> Result<Arc<Runtime>, EngineError> {
        self.runtime.read().clone().ok_or(EngineError::NotRunning)
    }

    fn load_from_disk(&self) -> Result<(Vec<NodeSpec>, Vec<WorkflowSpec>), EngineError> {
        let nodes = load_node_specs(&self.settings.nodes_path)?;
        let workflows = load_workflow_specs(&self.settings.workflows_path)?;
        Ok((nodes, workflows))
    }

    /// Validate, instantiate, mirror to the store, and start probing.
    async fn activate(
        &self,
        nodes: Vec<NodeSpec>,
        workflows: Vec<WorkflowSpec>,
    ) -> Result<Arc<Runtime>, EngineError> {
        let registry = NodeRegistry::from_specs(&nodes, &self.factory, Arc::clone(&self.store))?;
        let workflows = build_workflows(&workflows, &registry.ids())?;

        let records: Vec<_> = workflows.iter().map(WorkflowDefinition::to_record).collect();
        self.store.sync_config(&registry.records(), &records).await?;

        let registry = Arc::new(registry);
        let probe_cancel = CancellationToken::new();
        spawn_probe_loop(
            Arc::clone(&registry),
            self.settings.probe_interval,
            probe_cancel.clone(),
        );

        Ok(Arc::new(Runtime {
            registry,
            workflows: workflows.into_iter().map(Arc::new).collect(),
            probe_cancel,
        }))
    }

    fn reserve(&self, task_id: Uuid) -> Result<CancellationToken, EngineError> {
        let mut running = self.running.lock();
        if running.contains_key(&task_id) {
            return Err(EngineError::TaskAlreadyRunning(task_id));
        }
        let cancel = CancellationToken::new();
        running.insert(task_id, cancel.clone());
        Ok(cancel)
    }

    fn spawn(
        &self,
        runtime: &Runtime,
        workflow: Arc<WorkflowDefinition>,
        task_id: Uuid,
        cancel: CancellationToken,
    ) {
        let executor = StepExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&runtime.registry),
            self.settings.executor.clone(),
        );
        let running = Arc::clone(&self.running);
        self.tracker.spawn(async move {
            match executor.run(task_id, &workflow, &cancel).await {
                Ok(RunOutcome::Finished) | Ok(RunOutcome::Paused) => {}
                Ok(RunOutcome::Failed(cause)) => {
                    warn!(%task_id, error = %cause, "task failed");
                }
                Err(err) => {
                    error!(%task_id, error = %err, "task run aborted");
                }
            }
            running.lock().remove(&task_id);
        });
    }

    async fn prepare_continuation(
        &self,
        runtime: &Runtime,
        task_id: Uuid,
    ) -> Result<(Task, Arc<WorkflowDefinition>), EngineError> {
        let task = self.get_task(task_id).await?;
        if task.state == TaskState::Finished {
            return Err(EngineError::TaskNotResumable {
                id: task.id,
                state: task.state,
            });
        }
        let workflow = runtime
            .by_id(task.workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(format!("id {}", task.workflow_id)))?;

        let failed: Vec<String> = workflow
            .steps
            .iter()
            .filter(|step| {
                runtime
                    .registry
                    .get(&step.node_id)
                    .is_ok_and(|node| node.state == db::NodeState::Error)
            })
            .map(|step| step.node_id.clone())
            .collect();

        if !failed.is_empty() {
            let progress = TaskProgress {
                state: TaskState::Restarting,
                active_step: task.active_step.clone(),
                message: task.message.clone(),
            };
            self.store.update_task_progress(task_id, &progress).await?;
            for node_id in &failed {
                match runtime.registry.restart(node_id).await {
                    Ok(state) => info!(%task_id, %node_id, %state, "node restarted before continuation"),
                    Err(err) => warn!(%task_id, %node_id, error = %err, "node restart failed"),
                }
            }
        }

        Ok((task, workflow))
    }

    async fn recover_interrupted(&self, runtime: &Runtime) -> Result<(), EngineError> {
        let mut recovered = 0usize;
        for state in [TaskState::Active, TaskState::Pending, TaskState::Restarting] {
            for row in self.store.tasks_in_state(state).await? {
                let task_id = row.id;
                let Some(workflow) = runtime.by_id(row.workflow_id) else {
                    warn!(%task_id, workflow_id = row.workflow_id, "interrupted task has no workflow");
                    let progress = TaskProgress {
                        state: TaskState::Error,
                        active_step: row.active_step.clone(),
                        message: Some(format!("workflow {} is no longer configured", row.workflow_id)),
                    };
                    self.store.update_task_progress(task_id, &progress).await?;
                    continue;
                };
                let Ok(cancel) = self.reserve(task_id) else {
                    continue;
                };
                self.spawn(runtime, workflow, task_id, cancel);
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(tasks = recovered, "relaunched interrupted tasks");
        }
        Ok(())
    }
}

fn spawn_probe_loop(registry: Arc<NodeRegistry>, period: Duration, cancel: CancellationToken) {
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nodes were just built.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    registry.probe_all().await;
                }
            }
        }
    });
}
