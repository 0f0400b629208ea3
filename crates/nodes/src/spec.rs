//! `NodeSpec`: the configuration form of a node.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::NodeError;

/// One entry of the nodes configuration document.
///
/// ```json
/// { "id": "node-1", "name": "Mixer", "type": "http",
///   "properties": { "base_url": "http://10.0.0.4:8080" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    /// Key into the [`NodeFactory`](crate::NodeFactory) registration table.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Fetch a property that must be present.
    pub fn required(&self, key: &str) -> Result<&str, NodeError> {
        self.property(key).ok_or_else(|| NodeError::MissingProperty {
            node_id: self.id.clone(),
            property: key.to_owned(),
        })
    }

    /// Parse an optional property, falling back to `default` when absent.
    pub fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, NodeError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.property(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| NodeError::InvalidProperty {
                node_id: self.id.clone(),
                property: key.to_owned(),
                message: e.to_string(),
            }),
        }
    }
}
