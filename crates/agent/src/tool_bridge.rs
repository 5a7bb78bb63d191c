//! Tool bridge: the agent loop's only way to reach tools.
//!
//! Wraps a [`ToolExecutor`] with the run's policy: unknown names are
//! rejected before dispatch, dangerous tools are hidden and refused unless
//! allowed, gated tools go through an [`ApprovalGate`], and whatever the
//! executor does (error or panic) comes back as a [`ToolError`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use steerclaw_core::agent::AgentConfig;
use steerclaw_core::error::ToolError;
use steerclaw_core::tool::{ToolDefinition, ToolExecutionContext, ToolExecutor, ToolOutput};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest, DenyAll};

/// Identifies the run and call a tool invocation belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ToolInvocation<'a> {
    pub session_id: &'a str,
    pub run_id: Option<&'a str>,
    pub tool_call_id: &'a str,
}

pub struct ToolBridge {
    executor: Arc<dyn ToolExecutor>,
    gate: Arc<dyn ApprovalGate>,
    workspace_root: PathBuf,
    require_approval: bool,
    allow_dangerous: bool,
    /// Full catalog, fetched once
    catalog: OnceCell<Vec<ToolDefinition>>,
}

impl ToolBridge {
    /// A bridge that denies gated tools until a gate is set.
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            gate: Arc::new(DenyAll),
            workspace_root: PathBuf::from("."),
            require_approval: false,
            allow_dangerous: false,
            catalog: OnceCell::new(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Take `require_approval` and `allow_dangerous_tools` from the agent config.
    pub fn with_policy(mut self, config: &AgentConfig) -> Self {
        self.require_approval = config.require_approval;
        self.allow_dangerous = config.allow_dangerous_tools;
        self
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    async fn catalog(&self) -> Result<&[ToolDefinition], ToolError> {
        let defs = self
            .catalog
            .get_or_try_init(|| async {
                let mut defs = self.executor.list_tools().await?;
                defs.sort_by(|a, b| a.name.cmp(&b.name));
                defs.dedup_by(|a, b| a.name == b.name);
                debug!(tools = defs.len(), "Tool catalog loaded");
                Ok::<_, ToolError>(defs)
            })
            .await?;
        Ok(defs.as_slice())
    }

    /// The definitions offered to the model, sorted by name.
    pub async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self
            .catalog()
            .await?
            .iter()
            .filter(|d| self.allow_dangerous || !d.dangerous)
            .cloned()
            .collect())
    }

    /// Run one tool call under the bridge's policy.
    pub async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        invocation: ToolInvocation<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let definition = self
            .catalog()
            .await?
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if definition.dangerous && !self.allow_dangerous {
            warn!(tool = %name, "Refusing dangerous tool");
            return Err(ToolError::PermissionDenied {
                tool_name: name.to_string(),
                reason: "dangerous tools are disabled for this run".into(),
            });
        }

        if self.require_approval || definition.requires_approval {
            let request = ApprovalRequest {
                tool_call_id: invocation.tool_call_id.to_string(),
                tool_name: name.to_string(),
                args: args.clone(),
                session_id: invocation.session_id.to_string(),
                run_id: invocation.run_id.map(str::to_string),
                dangerous: definition.dangerous,
            };
            if let ApprovalDecision::Denied(reason) = self.gate.decide(&request).await {
                info!(tool = %name, %reason, "Tool call denied");
                return Err(ToolError::ApprovalDenied {
                    tool_name: name.to_string(),
                    reason,
                });
            }
        }

        let context = ToolExecutionContext {
            session_id: invocation.session_id.to_string(),
            run_id: invocation.run_id.map(str::to_string),
            tool_call_id: invocation.tool_call_id.to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            workspace_root: self.workspace_root.clone(),
        };

        debug!(
            tool = %name,
            correlation_id = %context.correlation_id,
            "Dispatching tool"
        );

        let outcome = AssertUnwindSafe(self.executor.call(name, args, &context))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(ToolError::ExecutionFailed { tool_name, reason })) => {
                Err(ToolError::ExecutionFailed { tool_name, reason })
            }
            Ok(Err(other)) => Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: other.to_string(),
            }),
            Err(payload) => {
                let reason = format!("tool panicked: {}", panic_message(payload.as_ref()));
                warn!(tool = %name, correlation_id = %context.correlation_id, %reason);
                Err(ToolError::ExecutionFailed {
                    tool_name: name.to_string(),
                    reason,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
