//! Built-in node kinds that need no external system.

use std::time::Duration;

use async_trait::async_trait;

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome, NodeSpec};

/// `type = "noop"`: always reachable, always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNode;

#[async_trait]
impl ExecutableNode for NoopNode {
    async fn is_reachable(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> NodeOutcome {
        NodeOutcome::success()
    }
}

/// `type = "delay"`: sleeps for `duration_ms` (default 0) and succeeds.
///
/// Handy to simulate a slow instrument when wiring up workflows.
#[derive(Debug, Clone)]
pub struct DelayNode {
    duration: Duration,
}

impl DelayNode {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_spec(spec: &NodeSpec) -> Result<Self, NodeError> {
        let millis: u64 = spec.parsed_or("duration_ms", 0)?;
        Ok(Self::new(Duration::from_millis(millis)))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn is_reachable(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> NodeOutcome {
        tokio::time::sleep(self.duration).await;
        NodeOutcome::success()
    }
}
