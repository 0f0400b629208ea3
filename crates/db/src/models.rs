//! Row structs that map 1-to-1 onto database tables, plus the state
//! enumerations backing the `task_states` and `node_states` lookup tables.
//!
//! These are *persistence* models. Domain types live in the `engine` crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// task_states
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Active,
    Paused,
    Finished,
    Error,
    Restarting,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Pending,
        Self::Active,
        Self::Paused,
        Self::Finished,
        Self::Error,
        Self::Restarting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Restarting => "RESTARTING",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DbError::InvalidValue(format!("unknown task state: {s}")))
    }
}

// ---------------------------------------------------------------------------
// node_states
// ---------------------------------------------------------------------------

/// Availability state of a node, as driven by the node registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Available,
    InUse,
    Offline,
    Recovery,
    Error,
    Restarting,
}

impl NodeState {
    pub const ALL: [NodeState; 6] = [
        Self::Available,
        Self::InUse,
        Self::Offline,
        Self::Recovery,
        Self::Error,
        Self::Restarting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::InUse => "IN_USE",
            Self::Offline => "OFFLINE",
            Self::Recovery => "RECOVERY",
            Self::Error => "ERROR",
            Self::Restarting => "RESTARTING",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeState {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DbError::InvalidValue(format!("unknown node state: {s}")))
    }
}

// ---------------------------------------------------------------------------
// nodes / node_properties
// ---------------------------------------------------------------------------

/// A persisted node row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

/// A node together with its properties, as written on config load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub state: NodeState,
    pub properties: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// workflows / steps
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub name: String,
    pub source_node_id: String,
    pub destination_node_id: String,
}

/// A persisted step row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StepRow {
    pub workflow_id: i64,
    pub node_id: String,
    pub position: i32,
}

/// A workflow together with its steps, as written on config load.
#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub workflow: WorkflowRow,
    pub steps: Vec<StepRow>,
}

// ---------------------------------------------------------------------------
// tasks
// ---------------------------------------------------------------------------

/// A persisted task row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub workflow_id: i64,
    /// Node id of the step currently executing or next to execute.
    pub active_step: Option<String>,
    pub state: String,
    pub args: serde_json::Value,
    pub emulate: bool,
    /// Failure message of the last step, if it failed.
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn state(&self) -> Result<TaskState, DbError> {
        self.state.parse()
    }
}

/// State and cursor of a task, always written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub state: TaskState,
    pub active_step: Option<String>,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// node_call_records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Success,
    Error,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A persisted node call record (append-only).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeCallRecordRow {
    pub id: i64,
    pub node_id: String,
    pub endpoint: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Seconds, measured end-to-end around the node call.
    pub duration: f64,
    pub outcome: String,
}

/// A node call record before insertion.
#[derive(Debug, Clone)]
pub struct NewNodeCallRecord {
    pub node_id: String,
    pub endpoint: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: f64,
    pub outcome: CallOutcome,
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// One completed step of one task (append-only).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLogRow {
    pub id: i64,
    pub task_id: Uuid,
    pub workflow_id: i64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub task_id: Uuid,
    pub workflow_id: i64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_usage_records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowUsageRow {
    pub id: i64,
    pub workflow_id: i64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// access_logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessLogRow {
    pub id: i64,
    pub ip: String,
    pub granted: bool,
    pub identifier: Option<String>,
    pub path: String,
    pub method: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessLog {
    pub ip: String,
    pub granted: bool,
    pub identifier: Option<String>,
    pub path: String,
    pub method: String,
}

// ---------------------------------------------------------------------------
// statistics (read models)
// ---------------------------------------------------------------------------

/// Aggregated call telemetry of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeStatisticRow {
    pub node_id: String,
    pub call_count: i64,
    pub average_duration: Option<f64>,
    pub minimum_duration: Option<f64>,
    pub maximum_duration: Option<f64>,
    pub success_rate: f64,
}

/// Number of tasks created per workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WorkflowUsageCountRow {
    pub workflow_id: i64,
    pub name: String,
    pub usage_count: i64,
}
