//! `engine` crate: domain models, configuration loading and validation,
//! the node registry, the step executor, and the orchestrator.

pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod telemetry;
pub mod validate;

pub use config::{StepSpec, WorkflowSpec};
pub use error::{ConfigIssue, EngineError};
pub use executor::{resume_position, ExecutorConfig, RunOutcome, StepExecutor};
pub use models::{Step, Task, WorkflowDefinition};
pub use orchestrator::{
    NodeStatus, Orchestrator, OrchestratorSettings, OrchestratorState, OrchestratorStatus,
    Statistics,
};
pub use registry::{NodeRegistry, NodeSnapshot};

#[cfg(test)]
mod executor_tests;
