//! Configuration documents: the node list and the workflow list.
//!
//! Both are JSON arrays. Nodes:
//!
//! ```json
//! [{ "id": "arm", "name": "Robot arm", "type": "http", "properties": { "base_url": "http://10.0.0.4" } }]
//! ```
//!
//! Workflows:
//!
//! ```json
//! [{ "id": 1, "name": "transfer", "steps": [{ "node": "arm", "position": 1 }] }]
//! ```
//!
//! Parsing here is purely structural. Semantic checks live in
//! [`crate::validate`].

use std::path::Path;

use nodes::NodeSpec;
use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(alias = "node_id")]
    pub node: String,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: i64,
    pub name: String,
    pub steps: Vec<StepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_attempts: Option<u32>,
}

pub fn parse_node_specs(raw: &str) -> Result<Vec<NodeSpec>, EngineError> {
    serde_json::from_str(raw).map_err(|source| EngineError::ConfigParse {
        what: "node configuration".into(),
        source,
    })
}

pub fn parse_workflow_specs(raw: &str) -> Result<Vec<WorkflowSpec>, EngineError> {
    serde_json::from_str(raw).map_err(|source| EngineError::ConfigParse {
        what: "workflow configuration".into(),
        source,
    })
}

pub fn load_node_specs(path: &Path) -> Result<Vec<NodeSpec>, EngineError> {
    parse_node_specs(&read(path)?)
}

pub fn load_workflow_specs(path: &Path) -> Result<Vec<WorkflowSpec>, EngineError> {
    parse_workflow_specs(&read(path)?)
}

fn read(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })
}
