//! `NodeFactory`: the registration table mapping a node `type` string to
//! the constructor that builds it.
//!
//! The table is populated explicitly at startup. Configuration naming a
//! type that was never registered is rejected instead of skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builtin::{DelayNode, NoopNode};
use crate::http::HttpNode;
use crate::{ExecutableNode, NodeError, NodeSpec};

/// Builds a live node from its configuration.
pub type NodeConstructor =
    Arc<dyn Fn(&NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct NodeFactory {
    constructors: HashMap<String, NodeConstructor>,
}

impl NodeFactory {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the built-in kinds: `noop`, `delay` and `http`.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory
            .register("noop", |_| Ok(Arc::new(NoopNode)))
            .register("delay", |spec| Ok(Arc::new(DelayNode::from_spec(spec)?)))
            .register("http", |spec| Ok(Arc::new(HttpNode::from_spec(spec)?)));
        factory
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build the node described by `spec`.
    ///
    /// # Errors
    /// [`NodeError::UnknownKind`] if `spec.kind` is not registered, or
    /// whatever the kind's constructor reports.
    pub fn build(&self, spec: &NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> {
        let constructor = self
            .constructors
            .get(&spec.kind)
            .ok_or_else(|| NodeError::UnknownKind(spec.kind.clone()))?;
        constructor(spec)
    }
}

impl fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let factory = NodeFactory::with_builtins();
        assert_eq!(factory.kinds(), vec!["delay", "http", "noop"]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let factory = NodeFactory::with_builtins();
        let spec = NodeSpec::new("n1", "Robot arm", "robot-arm");
        assert!(matches!(
            factory.build(&spec),
            Err(NodeError::UnknownKind(kind)) if kind == "robot-arm"
        ));
    }

    #[test]
    fn constructor_errors_are_propagated() {
        let factory = NodeFactory::with_builtins();
        let spec = NodeSpec::new("n1", "Remote", "http");
        assert!(matches!(
            factory.build(&spec),
            Err(NodeError::MissingProperty { property, .. }) if property == "base_url"
        ));
    }

    #[test]
    fn custom_kinds_can_replace_builtins() {
        let mut factory = NodeFactory::with_builtins();
        factory.register("noop", |spec| {
            Err(NodeError::Construction {
                node_id: spec.id.clone(),
                message: "disabled".into(),
            })
        });
        assert!(factory.build(&NodeSpec::new("n1", "Idle", "noop")).is_err());
    }
}
