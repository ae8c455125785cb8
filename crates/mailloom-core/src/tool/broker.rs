//! Tool transport trait.
//!
//! A broker fronts a registry of named tool servers. The agent runner lists
//! tools from every server in parallel at step start, qualifies names as
//! `"{server}-{tool}"`, and dispatches calls back through the broker with a
//! per-call context identifying the user and workflow instance (carried as
//! headers by HTTP transports).

use mailloom_types::error::ToolError;
use mailloom_types::llm::ToolSpec;
use serde_json::Value;
use uuid::Uuid;

/// Identifies the caller of one tool invocation.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallContext {
    pub user_id: Uuid,
    pub workflow_instance_uuid: Uuid,
}

/// Trait for tool transports.
pub trait ToolBroker: Send + Sync {
    /// The configured server names, in registry order.
    fn server_names(&self) -> Vec<String>;

    /// List the tools offered by one server. Names are unqualified.
    fn list_tools(
        &self,
        server: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ToolSpec>, ToolError>> + Send;

    /// Invoke one tool with JSON-object arguments. Returns the structured
    /// payload as the server produced it; a single `{"result": …}` wrapper
    /// key may be present and is unwrapped by the agent runner.
    fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        context: &ToolCallContext,
    ) -> impl std::future::Future<Output = Result<Value, ToolError>> + Send;
}
