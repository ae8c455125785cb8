//! HTTP tool broker.
//!
//! Fronts a configured registry of named tool servers. Tools are listed with
//! `GET {url}/tools` and invoked with `POST {url}/tools/{name}`; every
//! invocation carries `X-User-ID` and `X-Workflow-Instance` headers so
//! servers can scope their work to the calling user and run.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use mailloom_core::tool::broker::{ToolBroker, ToolCallContext};
use mailloom_types::error::ToolError;
use mailloom_types::llm::ToolSpec;

/// One named tool server endpoint.
#[derive(Debug, Clone)]
pub struct ToolServer {
    pub name: String,
    pub url: String,
}

/// HTTP-backed implementation of [`ToolBroker`].
pub struct HttpToolBroker {
    client: reqwest::Client,
    servers: HashMap<String, ToolServer>,
    order: Vec<String>,
}

impl HttpToolBroker {
    /// Create a broker over the given server registry. Per-call timeout is
    /// 60 seconds.
    pub fn new(servers: Vec<ToolServer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        let order = servers.iter().map(|s| s.name.clone()).collect();
        let servers = servers
            .into_iter()
            .map(|server| (server.name.clone(), server))
            .collect();
        Self {
            client,
            servers,
            order,
        }
    }

    fn server(&self, name: &str) -> Result<&ToolServer, ToolError> {
        self.servers
            .get(name)
            .ok_or_else(|| ToolError::ServerUnavailable(name.to_string()))
    }
}

impl ToolBroker for HttpToolBroker {
    fn server_names(&self) -> Vec<String> {
        self.order.clone()
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>, ToolError> {
        let server = self.server(server)?;
        let response = self
            .client
            .get(format!("{}/tools", server.url))
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "listing tools on '{}' returned HTTP {}",
                server.name,
                response.status()
            )));
        }

        response
            .json::<Vec<ToolSpec>>()
            .await
            .map_err(|e| ToolError::Transport(format!("invalid tool listing: {e}")))
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let server = self.server(server)?;
        let response = self
            .client
            .post(format!("{}/tools/{}", server.url, tool))
            .header("X-User-ID", context.user_id.to_string())
            .header(
                "X-Workflow-Instance",
                context.workflow_instance_uuid.to_string(),
            )
            .json(&arguments)
            .send()
            .await
            .map_err(|e| ToolError::CallFailed {
                server: server.name.clone(),
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::CallFailed {
                server: server.name.clone(),
                tool: tool.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        response.json::<Value>().await.map_err(|e| ToolError::CallFailed {
            server: server.name.clone(),
            tool: tool.to_string(),
            reason: format!("invalid response payload: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn broker() -> HttpToolBroker {
        HttpToolBroker::new(vec![
            ToolServer {
                name: "imap".to_string(),
                url: "http://localhost:9100".to_string(),
            },
            ToolServer {
                name: "tone".to_string(),
                url: "http://localhost:9200".to_string(),
            },
        ])
    }

    #[test]
    fn server_names_preserve_registry_order() {
        assert_eq!(broker().server_names(), vec!["imap", "tone"]);
    }

    #[tokio::test]
    async fn unknown_server_is_rejected_without_io() {
        let broker = broker();
        let context = ToolCallContext {
            user_id: Uuid::now_v7(),
            workflow_instance_uuid: Uuid::now_v7(),
        };
        let result = broker
            .call_tool("ghost", "search", Value::Null, &context)
            .await;
        assert!(matches!(result, Err(ToolError::ServerUnavailable(_))));
    }
}
