//! Completion provider trait: the abstraction over language-model backends.
//!
//! A provider receives the run's history, the system prompt and the tool
//! catalog, streams partial output through a callback, and resolves to the
//! final assistant content plus any requested tool calls.
//!
//! The wire protocol is entirely the implementor's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Whether invocations must pass the approval gate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,

    /// Whether the tool can cause irreversible side effects
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dangerous: bool,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_approval: false,
            dangerous: false,
        }
    }
}

/// Per-request options forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// The model to use (e.g., "ollama/llama3.1:8b")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Correlation ids for provider-side logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A partial piece of output surfaced while the provider call is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum StreamDelta {
    /// Visible assistant text
    Text(String),
    /// Reasoning output the model exposes separately
    Thinking(String),
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The resolved result of one completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Final assistant text
    pub content: String,

    /// Tool calls requested by the model, in call order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl CompletionResponse {
    /// A plain text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A response requesting tool calls, with optional accompanying text.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            ..Self::default()
        }
    }
}

/// Callback invoked for every streamed delta.
pub type DeltaSink<'a> = &'a (dyn Fn(StreamDelta) + Send + Sync);

/// The language-model backend consumed by the agent loop.
///
/// Implementations may invoke `on_delta` zero or more times before resolving.
/// The default [`CompletionProvider::complete`] contract is that the returned
/// `content` is the full text, regardless of how many deltas were emitted.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama").
    fn name(&self) -> &str;

    /// Request a completion for the given history.
    async fn complete(
        &self,
        history: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
        options: &CompletionOptions,
        on_delta: DeltaSink<'_>,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
