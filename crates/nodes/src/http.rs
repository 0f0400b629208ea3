//! `type = "http"`: a node fronting a remote instrument that speaks a small
//! JSON-over-HTTP protocol.
//!
//! | property       | default    |
//! |----------------|------------|
//! | `base_url`     | (required) |
//! | `execute_path` | `/execute` |
//! | `health_path`  | `/health`  |
//! | `timeout_ms`   | `10000`    |
//!
//! Reachability is a `GET` on the health path answering 2xx. Execution is a
//! `POST` of the step context to the execute path; a 2xx answer is success,
//! any other status becomes the failure code and a transport error becomes
//! code `1`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome, NodeSpec};

const TRANSPORT_FAILURE: i32 = 1;

#[derive(Debug, Clone)]
pub struct HttpNode {
    client: reqwest::Client,
    execute_url: String,
    health_url: String,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    task_id: Uuid,
    workflow_id: i64,
    source: Option<&'a str>,
    destination: Option<&'a str>,
    args: &'a Value,
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl HttpNode {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, NodeError> {
        let base_url = spec.required("base_url")?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(NodeError::InvalidProperty {
                node_id: spec.id.clone(),
                property: "base_url".into(),
                message: format!("'{base_url}' is not an http(s) url"),
            });
        }

        let timeout: u64 = spec.parsed_or("timeout_ms", 10_000)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout))
            .build()
            .map_err(|e| NodeError::Construction {
                node_id: spec.id.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            execute_url: join(base_url, spec.property("execute_path").unwrap_or("/execute")),
            health_url: join(base_url, spec.property("health_path").unwrap_or("/health")),
        })
    }

    pub fn execute_url(&self) -> &str {
        &self.execute_url
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }
}

#[async_trait]
impl ExecutableNode for HttpNode {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "health probe failed");
                false
            }
        }
    }

    async fn execute(&self, ctx: &ExecutionContext) -> NodeOutcome {
        let body = ExecuteRequest {
            task_id: ctx.task_id,
            workflow_id: ctx.workflow_id,
            source: ctx.source.as_deref(),
            destination: ctx.destination.as_deref(),
            args: &ctx.args,
        };

        let response = match self.client.post(&self.execute_url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                return NodeOutcome::failure(TRANSPORT_FAILURE, e.to_string())
                    .with_endpoint(self.execute_url.clone());
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            NodeOutcome {
                code: 0,
                message: (!text.is_empty()).then_some(text),
                endpoint: Some(self.execute_url.clone()),
            }
        } else {
            let message = if text.is_empty() { status.to_string() } else { text };
            NodeOutcome::failure(i32::from(status.as_u16()), message)
                .with_endpoint(self.execute_url.clone())
        }
    }
}
