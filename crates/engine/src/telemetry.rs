//! Per-step timing and the records derived from it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use db::models::{NewExecutionLog, NewNodeCallRecord};
use db::CallOutcome;
use nodes::NodeOutcome;
use tokio::time::Instant;
use uuid::Uuid;

/// Started when a step begins executing.
#[derive(Debug, Clone, Copy)]
pub struct StepTimer {
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl StepTimer {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn finish(self) -> StepSpan {
        let duration = self.clock.elapsed();
        StepSpan {
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration,
        }
    }
}

/// A finished step: wall-clock bounds plus the monotonic duration.
#[derive(Debug, Clone, Copy)]
pub struct StepSpan {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepSpan {
    pub fn call_record(&self, node_id: &str, outcome: &NodeOutcome) -> NewNodeCallRecord {
        NewNodeCallRecord {
            node_id: node_id.to_owned(),
            endpoint: outcome.endpoint.clone(),
            message: outcome.message.clone(),
            timestamp: self.started_at,
            duration: self.duration.as_secs_f64(),
            outcome: if outcome.is_success() {
                CallOutcome::Success
            } else {
                CallOutcome::Error
            },
        }
    }

    pub fn execution_log(&self, task_id: Uuid, workflow_id: i64, node_id: &str) -> NewExecutionLog {
        NewExecutionLog {
            task_id,
            workflow_id,
            name: node_id.to_owned(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    /// Time spent backing off before `node_id` was granted.
    pub fn wait_log(&self, task_id: Uuid, workflow_id: i64, node_id: &str) -> NewExecutionLog {
        NewExecutionLog {
            name: format!("{WAIT_PREFIX}{node_id}"),
            ..self.execution_log(task_id, workflow_id, node_id)
        }
    }
}

/// Timeline entries for acquisition waits are named `wait:<node id>`.
pub const WAIT_PREFIX: &str = "wait:";
