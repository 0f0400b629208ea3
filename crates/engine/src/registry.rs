//! `NodeRegistry`: the live node set and its exclusive-use state machine.
//!
//! Every node carries a small mutex-guarded entry (state, holder, version).
//! Transitions happen under that lock and never across an `.await`, so two
//! tasks racing for the same node observe exactly one winner. Node I/O
//! (restart hooks, reachability probes) runs with the lock released; the
//! `version` counter lets a probe detect that the node moved underneath it
//! and discard its stale result.
//!
//! The in-memory state is authoritative. Each transition is mirrored to the
//! store afterwards; a failed mirror write is logged, not propagated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::models::NodeRecord;
use db::{NodeState, TaskStore};
use nodes::{ExecutableNode, NodeFactory, NodeOutcome, NodeSpec};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ConfigIssue;
use crate::validate::validate_nodes;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: NodeState,
    /// Task currently holding the node, if any.
    pub task_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

struct Entry {
    state: NodeState,
    holder: Option<Uuid>,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl Entry {
    fn set(&mut self, state: NodeState) {
        self.state = state;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

struct Slot {
    spec: NodeSpec,
    node: Arc<dyn ExecutableNode>,
    entry: Mutex<Entry>,
    /// Orders mirror writes so the store converges on the latest state.
    persist: tokio::sync::Mutex<()>,
}

impl Slot {
    fn snapshot(&self) -> NodeSnapshot {
        let entry = self.entry.lock();
        NodeSnapshot {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            kind: self.spec.kind.clone(),
            state: entry.state,
            task_id: entry.holder,
            updated_at: entry.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

pub struct NodeRegistry {
    slots: HashMap<String, Arc<Slot>>,
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.slots.keys().collect();
        ids.sort();
        f.debug_struct("NodeRegistry").field("nodes", &ids).finish()
    }
}

impl NodeRegistry {
    /// Instantiate every node through `factory`. All nodes start `AVAILABLE`.
    pub fn from_specs(
        specs: &[NodeSpec],
        factory: &NodeFactory,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self, EngineError> {
        validate_nodes(specs)?;

        let mut slots = HashMap::with_capacity(specs.len());
        for spec in specs {
            let node = factory
                .build(spec)
                .map_err(|source| ConfigIssue::NodeConstruction {
                    node_id: spec.id.clone(),
                    source,
                })?;
            let slot = Slot {
                spec: spec.clone(),
                node,
                entry: Mutex::new(Entry {
                    state: NodeState::Available,
                    holder: None,
                    version: 0,
                    updated_at: Utc::now(),
                }),
                persist: tokio::sync::Mutex::new(()),
            };
            slots.insert(spec.id.clone(), Arc::new(slot));
        }

        Ok(Self { slots, store })
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.slots.contains_key(node_id)
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.slots.keys().map(String::as_str).collect()
    }

    pub fn get(&self, node_id: &str) -> Result<NodeSnapshot, EngineError> {
        Ok(self.slot(node_id)?.snapshot())
    }

    /// All nodes, sorted by id.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<NodeSnapshot> = self.slots.values().map(|slot| slot.snapshot()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Persistence form of the current node set.
    pub fn records(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self
            .slots
            .values()
            .map(|slot| NodeRecord {
                id: slot.spec.id.clone(),
                name: slot.spec.name.clone(),
                kind: slot.spec.kind.clone(),
                state: slot.entry.lock().state,
                properties: slot.spec.properties.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Ask the node itself whether it answers. Does not change its state.
    pub async fn is_reachable(&self, node_id: &str) -> Result<bool, EngineError> {
        let slot = self.slot(node_id)?;
        Ok(slot.node.is_reachable().await)
    }

    // -----------------------------------------------------------------------
    // Acquisition
    // -----------------------------------------------------------------------

    /// Claim `node_id` for `task_id`: `AVAILABLE -> IN_USE`.
    ///
    /// Fails with [`EngineError::NodeUnavailable`] if the node is in any
    /// other state. The caller decides whether to retry.
    pub async fn acquire(
        &self,
        node_id: &str,
        task_id: Uuid,
    ) -> Result<Arc<dyn ExecutableNode>, EngineError> {
        let slot = self.slot(node_id)?;
        {
            let mut entry = slot.entry.lock();
            if entry.state != NodeState::Available {
                return Err(EngineError::NodeUnavailable(node_id.to_owned()));
            }
            entry.set(NodeState::InUse);
            entry.holder = Some(task_id);
        }
        debug!(node_id, %task_id, "node acquired");
        self.persist(&slot).await;
        Ok(Arc::clone(&slot.node))
    }

    /// Hand a node back: `IN_USE -> AVAILABLE` on success, `IN_USE -> ERROR`
    /// otherwise.
    pub async fn release(&self, node_id: &str, task_id: Uuid, outcome: &NodeOutcome) {
        let Ok(slot) = self.slot(node_id) else {
            warn!(node_id, "release of unknown node ignored");
            return;
        };
        let state = {
            let mut entry = slot.entry.lock();
            if entry.state != NodeState::InUse || entry.holder != Some(task_id) {
                warn!(
                    node_id,
                    %task_id,
                    state = %entry.state,
                    "release by a task that does not hold the node ignored"
                );
                return;
            }
            let state = if outcome.is_success() {
                NodeState::Available
            } else {
                NodeState::Error
            };
            entry.set(state);
            entry.holder = None;
            state
        };
        if state == NodeState::Error {
            warn!(node_id, code = outcome.code, "node released in error");
        } else {
            debug!(node_id, "node released");
        }
        self.persist(&slot).await;
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Restart a node and probe it.
    ///
    /// `ERROR`/`OFFLINE` nodes pass through `RECOVERY`, others through
    /// `RESTARTING`; both end `AVAILABLE` if the node answers and `ERROR`
    /// if not. A node already restarting is left alone. A node held by a
    /// task is refused with [`EngineError::NodeInUse`].
    pub async fn restart(&self, node_id: &str) -> Result<NodeState, EngineError> {
        let slot = self.slot(node_id)?;
        {
            let mut entry = slot.entry.lock();
            match entry.state {
                NodeState::Restarting | NodeState::Recovery => return Ok(entry.state),
                NodeState::InUse => return Err(EngineError::NodeInUse(node_id.to_owned())),
                NodeState::Error | NodeState::Offline => entry.set(NodeState::Recovery),
                NodeState::Available => entry.set(NodeState::Restarting),
            }
        }
        info!(node_id, "restarting node");
        self.persist(&slot).await;

        let healthy = match slot.node.restart().await {
            Ok(()) => slot.node.is_reachable().await,
            Err(err) => {
                warn!(node_id, error = %err, "node restart hook failed");
                false
            }
        };

        // Nothing else moves a node out of RESTARTING/RECOVERY.
        let state = if healthy {
            NodeState::Available
        } else {
            NodeState::Error
        };
        slot.entry.lock().set(state);
        self.persist(&slot).await;

        if healthy {
            info!(node_id, "node restarted");
        } else {
            warn!(node_id, "node did not come back after restart");
        }
        Ok(state)
    }

    /// Probe every idle node and apply what the probe saw:
    /// `AVAILABLE -> OFFLINE` when unreachable, `OFFLINE -> AVAILABLE` when
    /// reachable again. Nodes in use, in error, or restarting are skipped.
    ///
    /// Returns the transitions that were applied.
    pub async fn probe_all(&self) -> Vec<(String, NodeState)> {
        let mut changed = Vec::new();
        for slot in self.slots.values() {
            let (observed, version) = {
                let entry = slot.entry.lock();
                (entry.state, entry.version)
            };
            if !matches!(observed, NodeState::Available | NodeState::Offline) {
                continue;
            }

            let reachable = slot.node.is_reachable().await;
            let target = match (observed, reachable) {
                (NodeState::Available, false) => NodeState::Offline,
                (NodeState::Offline, true) => NodeState::Available,
                _ => continue,
            };

            let applied = {
                let mut entry = slot.entry.lock();
                // A task or restart got there first: the probe result is stale.
                if entry.version == version {
                    entry.set(target);
                    true
                } else {
                    false
                }
            };
            if applied {
                info!(node_id = %slot.spec.id, state = %target, "probe changed node state");
                self.persist(slot).await;
                changed.push((slot.spec.id.clone(), target));
            } else {
                debug!(node_id = %slot.spec.id, "stale probe result discarded");
            }
        }
        changed
    }

    /// Run every node's shutdown hook and mark it `OFFLINE`. Call only once
    /// no task can hold a node.
    pub async fn shutdown_all(&self) {
        for slot in self.slots.values() {
            let node_id = slot.spec.id.as_str();
            let state = match slot.node.shutdown().await {
                Ok(()) => NodeState::Offline,
                Err(err) => {
                    warn!(node_id, error = %err, "node shutdown hook failed");
                    NodeState::Error
                }
            };
            {
                let mut entry = slot.entry.lock();
                entry.set(state);
                entry.holder = None;
            }
            self.persist(slot).await;
        }
        info!(nodes = self.slots.len(), "nodes shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn slot(&self, node_id: &str) -> Result<Arc<Slot>, EngineError> {
        self.slots
            .get(node_id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))
    }

    async fn persist(&self, slot: &Slot) {
        let _ordered = slot.persist.lock().await;
        let state = slot.entry.lock().state;
        if let Err(err) = self.store.update_node_state(&slot.spec.id, state).await {
            warn!(node_id = %slot.spec.id, error = %err, "failed to persist node state");
        }
    }
}
