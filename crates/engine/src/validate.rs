//! Configuration validation: run this before a configuration is activated.
//!
//! Rules enforced:
//! 1. Node IDs must be unique.
//! 2. Workflow IDs and names must be unique.
//! 3. Every workflow has at least one step.
//! 4. Step positions are unique within a workflow.
//! 5. A node appears at most once per workflow.
//! 6. Every step references a configured node.
//!
//! On success the workflows are returned with their steps sorted by position.

use std::collections::HashSet;

use nodes::NodeSpec;

use crate::config::WorkflowSpec;
use crate::error::ConfigIssue;
use crate::models::{Step, WorkflowDefinition};

/// Check that node IDs are unique.
pub fn validate_nodes(specs: &[NodeSpec]) -> Result<(), ConfigIssue> {
    let mut seen: HashSet<&str> = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(ConfigIssue::DuplicateNodeId(spec.id.clone()));
        }
    }
    Ok(())
}

/// Validate workflow specs against the configured node ids and build the
/// immutable definitions.
pub fn build_workflows(
    specs: &[WorkflowSpec],
    node_ids: &HashSet<&str>,
) -> Result<Vec<WorkflowDefinition>, ConfigIssue> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    let mut built = Vec::with_capacity(specs.len());

    for spec in specs {
        if !ids.insert(spec.id) {
            return Err(ConfigIssue::DuplicateWorkflowId(spec.id));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(ConfigIssue::DuplicateWorkflowName(spec.name.clone()));
        }
        if spec.steps.is_empty() {
            return Err(ConfigIssue::EmptyWorkflow(spec.name.clone()));
        }
        if spec.acquire_attempts == Some(0) {
            return Err(ConfigIssue::InvalidRetryCeiling(spec.name.clone()));
        }

        let mut positions = HashSet::new();
        let mut members = HashSet::new();
        for step in &spec.steps {
            if !positions.insert(step.position) {
                return Err(ConfigIssue::DuplicatePosition {
                    workflow: spec.name.clone(),
                    position: step.position,
                });
            }
            if !members.insert(step.node.as_str()) {
                return Err(ConfigIssue::RepeatedNode {
                    workflow: spec.name.clone(),
                    node_id: step.node.clone(),
                });
            }
            if !node_ids.contains(step.node.as_str()) {
                return Err(ConfigIssue::UnknownNodeReference {
                    workflow: spec.name.clone(),
                    node_id: step.node.clone(),
                });
            }
        }

        let mut steps: Vec<Step> = spec
            .steps
            .iter()
            .map(|step| Step {
                node_id: step.node.clone(),
                position: step.position,
            })
            .collect();
        steps.sort_by_key(|step| step.position);

        built.push(WorkflowDefinition {
            id: spec.id,
            name: spec.name.clone(),
            steps,
            acquire_attempts: spec.acquire_attempts,
        });
    }

    Ok(built)
}
