//! `nodes` crate: the `ExecutableNode` contract, the registration table that
//! turns configuration into live nodes, and the built-in node kinds.
//!
//! Every node (built-in or third-party) implements [`ExecutableNode`].
//! The engine never inspects concrete node types: it resolves a [`NodeSpec`]
//! through a [`NodeFactory`] once, at config load, and dispatches through the
//! trait object afterwards.

pub mod builtin;
pub mod error;
pub mod factory;
pub mod http;
pub mod mock;
pub mod spec;
pub mod traits;

pub use error::NodeError;
pub use factory::NodeFactory;
pub use spec::NodeSpec;
pub use traits::{ExecutableNode, ExecutionContext, NodeOutcome};
