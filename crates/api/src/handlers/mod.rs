pub mod config;
pub mod nodes;
pub mod orchestrator;
pub mod tasks;
pub mod workflows;
