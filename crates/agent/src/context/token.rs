//! Token estimation.
//!
//! Character heuristic: one token per four bytes, rounded up. Budgets are
//! enforced against these estimates, never against a real tokenizer.

use steerclaw_core::message::Message;
use steerclaw_core::provider::ToolDefinition;

/// Per-message overhead for role name and wire-format delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Tokens for one message: overhead, content and any tool call payloads.
///
/// A message whose `tokens` field is set is trusted as-is.
pub fn estimate_message_tokens(message: &Message) -> usize {
    if let Some(known) = message.tokens {
        return known;
    }
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| estimate_tokens(&call.name) + estimate_tokens(&call.arguments.to_string()))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Tokens for the serialized tool catalog.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}
