//! The `ExecutableNode` trait: the contract every node must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::NodeError;

/// Everything a node learns about the step it is executing.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    /// Task driving this step.
    pub task_id: Uuid,
    /// Workflow the task is an instance of.
    pub workflow_id: i64,
    /// Node id of the previous step, `None` on the first step.
    pub source: Option<String>,
    /// Node id of the next step, `None` on the last step.
    pub destination: Option<String>,
    /// Opaque task arguments, identical for every step.
    pub args: Value,
}

/// Result of one `execute` call.
///
/// `code == 0` is success. Any other value is a node-defined failure class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub code: i32,
    pub message: Option<String>,
    pub endpoint: Option<String>,
}

impl NodeOutcome {
    pub fn success() -> Self {
        Self { code: 0, message: None, endpoint: None }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// The core node trait.
///
/// A task that failed on a step, or was paused, re-runs that step from
/// scratch when it is continued. Implementations must therefore tolerate
/// being executed again for the same `task_id`.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Liveness probe. Must not have side effects and must not fail:
    /// any problem is reported as `false`.
    async fn is_reachable(&self) -> bool;

    /// Perform the node's unit of work for one step of a task.
    async fn execute(&self, ctx: &ExecutionContext) -> NodeOutcome;

    /// Node specific restart procedure, run before the post-restart probe.
    async fn restart(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Node specific shutdown procedure, run when the orchestrator stops.
    async fn shutdown(&self) -> Result<(), NodeError> {
        Ok(())
    }
}
