//! Core domain models for the engine.
//!
//! These types are the source of truth for what a workflow and a task look
//! like in memory. Their persisted forms live in `db::models`.

use chrono::{DateTime, Utc};
use db::models::{StepRow, TaskRow, WorkflowRecord, WorkflowRow};
use db::{DbError, TaskState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One (position, node) pair within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub node_id: String,
    pub position: i32,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// An immutable, validated, linear chain of steps.
///
/// Steps are sorted by ascending `position`, non-empty, and each node id
/// appears once. Construct through [`crate::validate::build_workflows`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: i64,
    pub name: String,
    pub steps: Vec<Step>,
    /// Per-workflow override of the acquisition retry ceiling.
    pub acquire_attempts: Option<u32>,
}

impl WorkflowDefinition {
    pub fn source_node(&self) -> &str {
        &self.steps[0].node_id
    }

    pub fn destination_node(&self) -> &str {
        &self.steps[self.steps.len() - 1].node_id
    }

    pub fn step_index(&self, node_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.node_id == node_id)
    }

    pub fn to_record(&self) -> WorkflowRecord {
        WorkflowRecord {
            workflow: WorkflowRow {
                id: self.id,
                name: self.name.clone(),
                source_node_id: self.source_node().to_owned(),
                destination_node_id: self.destination_node().to_owned(),
            },
            steps: self
                .steps
                .iter()
                .map(|step| StepRow {
                    workflow_id: self.id,
                    node_id: step.node_id.clone(),
                    position: step.position,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One durable execution instance of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: i64,
    /// Resume cursor: node id of the step executing or next to execute.
    pub active_step: Option<String>,
    pub state: TaskState,
    pub args: Value,
    /// Skip real node calls (dry run of the workflow wiring).
    pub emulate: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `PENDING` task.
    pub fn new(workflow_id: i64, args: Value, emulate: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            active_step: None,
            state: TaskState::Pending,
            args,
            emulate,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_row(&self) -> TaskRow {
        TaskRow {
            id: self.id,
            workflow_id: self.workflow_id,
            active_step: self.active_step.clone(),
            state: self.state.to_string(),
            args: self.args.clone(),
            emulate: self.emulate,
            message: self.message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = DbError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let state = row.state()?;
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            active_step: row.active_step,
            state,
            args: row.args,
            emulate: row.emulate,
            message: row.message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_survives_row_conversion() {
        let task = Task::new(7, json!({ "plate": "A1" }), true);
        let back = Task::try_from(task.to_row()).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn row_with_unknown_state_is_rejected() {
        let mut row = Task::new(7, Value::Null, false).to_row();
        row.state = "SLEEPING".into();
        assert!(Task::try_from(row).is_err());
    }

    #[test]
    fn record_exposes_source_and_destination() {
        let workflow = WorkflowDefinition {
            id: 4,
            name: "transfer".into(),
            steps: vec![
                Step { node_id: "arm".into(), position: 1 },
                Step { node_id: "reader".into(), position: 2 },
            ],
            acquire_attempts: None,
        };
        let record = workflow.to_record();
        assert_eq!(record.workflow.source_node_id, "arm");
        assert_eq!(record.workflow.destination_node_id, "reader");
        assert_eq!(record.steps.len(), 2);
        assert_eq!(workflow.step_index("reader"), Some(1));
    }
}
