//! Engine-level error types.

use std::path::PathBuf;

use db::TaskState;
use nodes::NodeError;
use thiserror::Error;
use uuid::Uuid;

/// Why a node or workflow configuration was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node kind could not be instantiated.
    #[error("node '{node_id}': {source}")]
    NodeConstruction {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("duplicate workflow ID: {0}")]
    DuplicateWorkflowId(i64),

    #[error("duplicate workflow name: '{0}'")]
    DuplicateWorkflowName(String),

    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(String),

    #[error("workflow '{workflow}' has two steps at position {position}")]
    DuplicatePosition { workflow: String, position: i32 },

    /// A node may appear at most once per workflow: the task cursor is a node id.
    #[error("workflow '{workflow}' uses node '{node_id}' more than once")]
    RepeatedNode { workflow: String, node_id: String },

    /// A step references a node ID that doesn't exist in the node set.
    #[error("workflow '{workflow}' references unknown node '{node_id}'")]
    UnknownNodeReference { workflow: String, node_id: String },

    #[error("workflow '{0}' must allow at least one acquisition attempt")]
    InvalidRetryCeiling(String),
}

/// Errors produced by the workflow engine (configuration, lookups, lifecycle).
///
/// Node failures during a task run are not raised to callers: they end up
/// on the task record. [`EngineError::StepExecutionFailed`] and
/// [`EngineError::NodeUnavailable`] only travel inside a
/// [`RunOutcome`](crate::executor::RunOutcome).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Lookup errors ------
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// Retryable: the node is held by another task or not healthy.
    #[error("node '{0}' is unavailable")]
    NodeUnavailable(String),

    #[error("node '{0}' is in use by a task")]
    NodeInUse(String),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {0} is already running")]
    TaskAlreadyRunning(Uuid),

    #[error("task {0} is not running")]
    TaskNotRunning(Uuid),

    #[error("task {id} cannot be continued from state {state}")]
    TaskNotResumable { id: Uuid, state: TaskState },

    /// The persisted cursor does not match the task's workflow.
    #[error("task {id} is inconsistent: {reason}")]
    InconsistentTask { id: Uuid, reason: String },

    // ------ Configuration errors ------
    #[error("configuration rejected: {0}")]
    ConfigValidationFailed(#[from] ConfigIssue),

    #[error("cannot read {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {what}: {source}")]
    ConfigParse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    // ------ Execution errors ------
    /// A node returned a non-zero code.
    #[error("step '{node_id}' failed with code {code}: {}", message.as_deref().unwrap_or("no message"))]
    StepExecutionFailed {
        node_id: String,
        code: i32,
        message: Option<String>,
        endpoint: Option<String>,
    },

    // ------ Lifecycle errors ------
    #[error("orchestrator is not running")]
    NotRunning,

    #[error("orchestrator is already running")]
    AlreadyRunning,

    #[error("orchestrator is already stopped")]
    AlreadyStopped,

    #[error("cannot reload configuration while {0} task(s) are running")]
    ReloadWhileRunning(usize),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
