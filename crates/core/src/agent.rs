//! Agent configuration, run status and run result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::plan::{TaskPlan, WorkingSummary};

/// Configuration for one agent run. Immutable while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to request from the completion provider
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temp")]
    pub temperature: f32,

    /// Maximum tool calls across the whole run (safety limit)
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    /// Maximum provider round-trips per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Wall-clock budget for the run, checked at turn boundaries
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Expose tools flagged as dangerous
    #[serde(default)]
    pub allow_dangerous_tools: bool,

    /// Route every tool call through the approval gate
    #[serde(default)]
    pub require_approval: bool,

    /// Context window the run may fill
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Tokens held back for the model's answer
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,
}

fn default_model() -> String {
    "ollama/llama3.1:8b".into()
}
fn default_temp() -> f32 {
    0.7
}
fn default_max_tool_calls() -> u32 {
    25
}
fn default_max_turns() -> u32 {
    10
}
fn default_timeout_ms() -> u64 {
    120_000
}
fn default_max_context_tokens() -> usize {
    8192
}
fn default_reserved_tokens() -> usize {
    1024
}

impl AgentConfig {
    /// The token budget history and system prompt must fit into.
    pub fn usable_context_tokens(&self) -> usize {
        self.max_context_tokens.saturating_sub(self.reserved_tokens)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temp(),
            max_tool_calls: default_max_tool_calls(),
            max_turns: default_max_turns(),
            timeout_ms: default_timeout_ms(),
            allow_dangerous_tools: false,
            require_approval: false,
            max_context_tokens: default_max_context_tokens(),
            reserved_tokens: default_reserved_tokens(),
        }
    }
}

/// Lifecycle status of a run.
///
/// Transitions are monotonic: `Queued → Running → ` exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Error,
    Aborted,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Aborted | Self::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of one executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
}

/// The terminal outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Best available response text
    pub response: String,
    pub tool_executions: Vec<ToolExecutionResult>,
    /// Full history at the end of the run (after any compaction)
    pub messages: Vec<Message>,
    pub turns: u32,
    pub duration_ms: u64,
    pub run_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<TaskPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<WorkingSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_budget_subtracts_reserve() {
        let config = AgentConfig {
            max_context_tokens: 500,
            reserved_tokens: 100,
            ..AgentConfig::default()
        };
        assert_eq!(config.usable_context_tokens(), 400);
    }

    #[test]
    fn usable_budget_saturates() {
        let config = AgentConfig {
            max_context_tokens: 100,
            reserved_tokens: 500,
            ..AgentConfig::default()
        };
        assert_eq!(config.usable_context_tokens(), 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Timeout.is_terminal());
        assert_eq!(RunStatus::Aborted.to_string(), "aborted");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_turns": 3}"#).unwrap();
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.max_tool_calls, 25);
        assert!(!config.allow_dangerous_tools);
    }
}
