//! `MockNode`: a scriptable test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeFactory, NodeOutcome};

/// A mock node that records every call it receives and replays a queue of
/// programmer-specified outcomes (success once the queue runs dry).
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    outcomes: Mutex<VecDeque<NodeOutcome>>,
    reachable: AtomicBool,
    restart_fails: AtomicBool,
    delay: Option<Duration>,
    restart_delay: Option<Duration>,
    calls: Mutex<Vec<ExecutionContext>>,
    restarts: AtomicUsize,
    probes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockNode {
    /// Create a mock that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_outcomes(name, [])
    }

    /// Create a mock that returns `outcomes` in order, then succeeds.
    pub fn with_outcomes(
        name: impl Into<String>,
        outcomes: impl IntoIterator<Item = NodeOutcome>,
    ) -> Self {
        Self {
            name: name.into(),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            reachable: AtomicBool::new(true),
            restart_fails: AtomicBool::new(false),
            delay: None,
            restart_delay: None,
            calls: Mutex::new(Vec::new()),
            restarts: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every execution take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every restart hook take `delay`.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = Some(delay);
        self
    }

    pub fn push_outcome(&self, outcome: NodeOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn fail_restarts(&self, fail: bool) {
        self.restart_fails.store(fail, Ordering::SeqCst);
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// All contexts seen by this node (in call order).
    pub fn calls(&self) -> Vec<ExecutionContext> {
        self.calls.lock().unwrap().clone()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `execute` calls ever observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn is_reachable(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> NodeOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(ctx.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(NodeOutcome::success);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn restart(&self) -> Result<(), NodeError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.restart_delay {
            tokio::time::sleep(delay).await;
        }
        if self.restart_fails.load(Ordering::SeqCst) {
            Err(NodeError::Lifecycle(format!("{} refused to restart", self.name)))
        } else {
            Ok(())
        }
    }
}

/// A factory whose `mock` kind resolves each node spec by id against `nodes`,
/// so tests keep a handle on the very instance the engine drives.
pub fn mock_factory(nodes: HashMap<String, Arc<MockNode>>) -> NodeFactory {
    let mut factory = NodeFactory::new();
    factory.register("mock", move |spec| {
        let node = nodes.get(&spec.id).cloned().ok_or_else(|| NodeError::Construction {
            node_id: spec.id.clone(),
            message: "no mock registered for this id".into(),
        })?;
        Ok(node as Arc<dyn ExecutableNode>)
    });
    factory
}
