//! Tool traits: the abstraction over agent capabilities.
//!
//! The agent loop never talks to tools directly. It goes through a
//! [`ToolExecutor`], which lists the catalog and invokes tools by name.
//! [`ToolRegistry`] is the in-process executor: register [`Tool`]
//! implementations and hand the registry to the tool bridge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ToolError;
pub use crate::provider::ToolDefinition;

/// Context injected into every tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionContext {
    /// Session the invoking run belongs to
    pub session_id: String,

    /// The invoking run, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// The model-assigned tool call id
    pub tool_call_id: String,

    /// Unique id for this single invocation, for log correlation
    pub correlation_id: String,

    /// Root directory tools should treat as their workspace
    pub workspace_root: PathBuf,
}

/// The output of a successful tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The output content fed back to the model
    pub content: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }
}

/// The Tool Executor collaborator consumed by the tool bridge.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// List the tools this executor can run.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDefinition>, ToolError>;

    /// Invoke a tool by name.
    async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether each invocation needs an approval decision.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Whether the tool can cause irreversible side effects.
    fn dangerous(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            requires_approval: self.requires_approval(),
            dangerous: self.dangerous(),
        }
    }
}

/// A registry of in-process tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// All tool definitions, sorted by name so the catalog is stable across calls.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.definitions())
    }

    async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments, context).await
    }
}
