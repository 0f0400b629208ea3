//! Node-level error type.

use thiserror::Error;

/// Errors raised while building a node from its configuration or while
/// running one of its lifecycle hooks.
///
/// Execution failures are *not* errors: they travel as a non-zero
/// [`NodeOutcome`](crate::NodeOutcome) code so the engine can persist them
/// on the task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// No constructor is registered for the configured `type`.
    #[error("unknown node type '{0}'")]
    UnknownKind(String),

    /// A property the node kind needs is absent.
    #[error("node '{node_id}' is missing required property '{property}'")]
    MissingProperty {
        node_id: String,
        property: String,
    },

    /// A property is present but cannot be interpreted.
    #[error("node '{node_id}' has invalid property '{property}': {message}")]
    InvalidProperty {
        node_id: String,
        property: String,
        message: String,
    },

    /// The constructor itself failed (client setup, missing test double, ...).
    #[error("could not construct node '{node_id}': {message}")]
    Construction {
        node_id: String,
        message: String,
    },

    /// A restart or shutdown hook reported a failure.
    #[error("node lifecycle hook failed: {0}")]
    Lifecycle(String),
}
