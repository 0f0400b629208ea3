//! Step execution engine.
//!
//! `StepExecutor` drives one task through its workflow:
//! 1. Loads the task and derives the resume position from `active_step`.
//! 2. For each remaining step: acquires the node (with exponential back-off),
//!    calls it (or skips the call when emulating), releases it.
//! 3. Advances the durable cursor as soon as the node is released. On
//!    failure the cursor stays on the failed step so a later continuation
//!    re-runs only that step.
//! 4. Writes an execution log per step, a node call record per real call, and
//!    a wait entry when the step had to back off for its node. These are
//!    telemetry: a failed write is logged and the run carries on.
//!
//! Cancellation is honored only between steps: an in-flight node call is
//! never interrupted.

use std::sync::Arc;
use std::time::Duration;

use db::models::TaskProgress;
use db::{DbError, TaskState, TaskStore};
use nodes::{ExecutableNode, ExecutionContext, NodeOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{Task, WorkflowDefinition};
use crate::registry::NodeRegistry;
use crate::telemetry::{StepSpan, StepTimer};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How many times a step tries to acquire its node before the task
    /// fails. Workflows may override it.
    pub acquire_attempts: u32,
    /// Base delay for exponential back-off between acquisition attempts.
    pub acquire_base_delay: Duration,
    /// Upper bound for a single back-off delay.
    pub acquire_max_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: 5,
            acquire_base_delay: Duration::from_millis(200),
            acquire_max_delay: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    /// Delay after the `attempt`-th failed acquisition (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.acquire_base_delay
            .saturating_mul(factor)
            .min(self.acquire_max_delay)
    }
}

// ---------------------------------------------------------------------------
// Output of a run
// ---------------------------------------------------------------------------

/// How a run ended. Every variant has already been persisted on the task.
#[derive(Debug)]
pub enum RunOutcome {
    Finished,
    /// Stopped at a step boundary; `active_step` names the next step.
    Paused,
    /// The task is in `ERROR`; carries the cause.
    Failed(EngineError),
}

enum Acquired {
    /// `refusals` counts the busy answers before the node was granted.
    Node {
        node: Arc<dyn ExecutableNode>,
        refusals: u32,
    },
    Cancelled,
}

fn keep_going(written: Result<(), DbError>) {
    if let Err(err) = written {
        warn!(error = %err, "telemetry write failed");
    }
}

// ---------------------------------------------------------------------------
// Resume position
// ---------------------------------------------------------------------------

/// Index of the step a task (re)starts from.
///
/// No cursor means the first step. A cursor naming a node outside the
/// workflow is an inconsistency, not a restart from scratch.
pub fn resume_position(task: &Task, workflow: &WorkflowDefinition) -> Result<usize, EngineError> {
    if task.workflow_id != workflow.id {
        return Err(EngineError::InconsistentTask {
            id: task.id,
            reason: format!(
                "belongs to workflow {} but was resumed with workflow {}",
                task.workflow_id, workflow.id
            ),
        });
    }
    match task.active_step.as_deref() {
        None => Ok(0),
        Some(node_id) => workflow
            .step_index(node_id)
            .ok_or_else(|| EngineError::InconsistentTask {
                id: task.id,
                reason: format!("active step '{node_id}' is not part of '{}'", workflow.name),
            }),
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub struct StepExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run `task_id` from its cursor to the end of `workflow`, a failure, or
    /// a cancellation observed at a step boundary.
    ///
    /// Step failures are reported through [`RunOutcome::Failed`]; `Err` is
    /// reserved for problems that prevent the task record from being kept
    /// (store errors, inconsistent cursors, finished tasks).
    #[instrument(skip(self, workflow, cancel), fields(workflow = %workflow.name))]
    pub async fn run(
        &self,
        task_id: Uuid,
        workflow: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let task = self.load(task_id).await?;
        if task.state == TaskState::Finished {
            return Err(EngineError::TaskNotResumable {
                id: task.id,
                state: task.state,
            });
        }

        let mut index = resume_position(&task, workflow)?;
        let attempts = workflow
            .acquire_attempts
            .unwrap_or(self.config.acquire_attempts)
            .max(1);

        self.progress(task.id, TaskState::Active, Some(workflow.steps[index].node_id.as_str()), None)
            .await?;
        info!(
            step = %workflow.steps[index].node_id,
            resumed = task.active_step.is_some(),
            emulate = task.emulate,
            "task running"
        );

        loop {
            let step = &workflow.steps[index];

            if cancel.is_cancelled() {
                return self.pause(task.id, &step.node_id).await;
            }

            let wait = StepTimer::start();
            let node = match self.acquire(task.id, &step.node_id, attempts, cancel).await {
                Ok(Acquired::Node { node, refusals }) => {
                    if refusals > 0 {
                        let log = wait.finish().wait_log(task.id, workflow.id, &step.node_id);
                        keep_going(self.store.record_execution(&log).await);
                    }
                    node
                }
                Ok(Acquired::Cancelled) => return self.pause(task.id, &step.node_id).await,
                Err(err @ (EngineError::NodeUnavailable(_) | EngineError::NodeNotFound(_))) => {
                    let message = format!("{err} after {attempts} attempt(s)");
                    warn!(step = %step.node_id, attempts, "giving up on node acquisition");
                    self.progress(task.id, TaskState::Error, Some(step.node_id.as_str()), Some(message))
                        .await?;
                    return Ok(RunOutcome::Failed(err));
                }
                Err(err) => return Err(err),
            };

            let ctx = ExecutionContext {
                task_id: task.id,
                workflow_id: workflow.id,
                source: index
                    .checked_sub(1)
                    .map(|previous| workflow.steps[previous].node_id.clone()),
                destination: workflow.steps.get(index + 1).map(|next| next.node_id.clone()),
                args: task.args.clone(),
            };

            let timer = StepTimer::start();
            let outcome = if task.emulate {
                debug!(step = %step.node_id, "emulating node call");
                NodeOutcome::success()
            } else {
                node.execute(&ctx).await
            };
            let span = timer.finish();

            self.registry.release(&step.node_id, task.id, &outcome).await;

            if !outcome.is_success() {
                warn!(
                    step = %step.node_id,
                    code = outcome.code,
                    message = outcome.message.as_deref().unwrap_or(""),
                    "step failed"
                );
                self.progress(
                    task.id,
                    TaskState::Error,
                    Some(step.node_id.as_str()),
                    outcome.message.clone(),
                )
                .await?;
                self.record_step(&task, workflow.id, &step.node_id, &span, &outcome)
                    .await;
                return Ok(RunOutcome::Failed(EngineError::StepExecutionFailed {
                    node_id: step.node_id.clone(),
                    code: outcome.code,
                    message: outcome.message,
                    endpoint: outcome.endpoint,
                }));
            }

            info!(step = %step.node_id, elapsed_ms = span.duration.as_millis() as u64, "step completed");

            let next = workflow.steps.get(index + 1);
            match next {
                Some(next) => {
                    self.progress(task.id, TaskState::Active, Some(next.node_id.as_str()), None)
                        .await?
                }
                None => self.progress(task.id, TaskState::Finished, None, None).await?,
            }
            self.record_step(&task, workflow.id, &step.node_id, &span, &outcome)
                .await;

            if next.is_none() {
                info!("task finished");
                return Ok(RunOutcome::Finished);
            }
            index += 1;
        }
    }

    /// Acquire with back-off: `base * 2^(n-1)` after the n-th refusal,
    /// capped at `acquire_max_delay`. A cancellation during a back-off
    /// sleep ends the wait.
    async fn acquire(
        &self,
        task_id: Uuid,
        node_id: &str,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Acquired, EngineError> {
        let mut attempt = 1;
        loop {
            match self.registry.acquire(node_id, task_id).await {
                Ok(node) => {
                    return Ok(Acquired::Node {
                        node,
                        refusals: attempt - 1,
                    })
                }
                Err(EngineError::NodeUnavailable(_)) if attempt < attempts => {
                    let delay = self.config.backoff(attempt);
                    debug!(node_id, attempt, delay_ms = delay.as_millis() as u64, "node busy, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Ok(Acquired::Cancelled),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Call record (real calls only) and execution log of a finished step.
    async fn record_step(
        &self,
        task: &Task,
        workflow_id: i64,
        node_id: &str,
        span: &StepSpan,
        outcome: &NodeOutcome,
    ) {
        if !task.emulate {
            let record = span.call_record(node_id, outcome);
            keep_going(self.store.record_node_call(&record).await);
        }
        let log = span.execution_log(task.id, workflow_id, node_id);
        keep_going(self.store.record_execution(&log).await);
    }

    async fn pause(&self, task_id: Uuid, node_id: &str) -> Result<RunOutcome, EngineError> {
        self.progress(task_id, TaskState::Paused, Some(node_id), None).await?;
        info!(next_step = node_id, "task paused");
        Ok(RunOutcome::Paused)
    }

    async fn load(&self, task_id: Uuid) -> Result<Task, EngineError> {
        let row = self.store.get_task(task_id).await.map_err(|err| match err {
            DbError::NotFound => EngineError::TaskNotFound(task_id),
            other => other.into(),
        })?;
        Ok(Task::try_from(row)?)
    }

    async fn progress(
        &self,
        task_id: Uuid,
        state: TaskState,
        active_step: Option<&str>,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let progress = TaskProgress {
            state,
            active_step: active_step.map(str::to_owned),
            message,
        };
        self.store.update_task_progress(task_id, &progress).await?;
        Ok(())
    }
}
