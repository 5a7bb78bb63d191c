//! History compaction against the run's token budget.
//!
//! The budget is `max_context_tokens - reserved_tokens`, tightened to the
//! model's own window when the router knows it. System prompt tokens count
//! against the budget. When history is over budget the configured strategy
//! removes messages from the oldest end of the middle span:
//!
//! | Strategy | Dropped span |
//! |----------|--------------|
//! | `drop_oldest` | Deleted |
//! | `summarize` | Whole middle folded into one summary message |
//! | `hybrid` | Oldest first, one at a time, folded into a summary |
//!
//! With `keep_first_last` the first and newest message always survive; the
//! newest always survives regardless. When history ends in tool results the
//! assistant message that requested them survives with them, and a retained
//! span never starts with a tool-role message whose assistant call was dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use steerclaw_config::{CompressionStrategy, ContextConfig};
use steerclaw_core::agent::AgentConfig;
use steerclaw_core::message::{Message, Role};
use steerclaw_providers::ModelRouter;

use super::token::{MESSAGE_OVERHEAD, estimate_message_tokens, estimate_tokens};

/// Metadata key marking a synthetic summary message.
pub const SUMMARY_METADATA_KEY: &str = "compaction_summary";

const SNIPPET_CHARS: usize = 120;

/// Outcome of [`ContextManager::compress_history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub messages: Vec<Message>,
    /// Tokens of system prompt plus the returned messages
    pub compressed_token_count: usize,
    pub original_token_count: usize,
    /// Original messages no longer present verbatim
    pub removed_messages: usize,
    /// Original messages retained / original count; 1.0 when untouched
    pub compression_ratio: f64,
    /// `None` when the history already fit
    pub strategy_used: Option<CompressionStrategy>,
    /// Whether a summary message was inserted
    pub summarized: bool,
}

impl CompressionResult {
    pub fn is_identity(&self) -> bool {
        self.strategy_used.is_none()
    }

    pub fn fits(&self, budget: usize) -> bool {
        self.compressed_token_count <= budget
    }
}

pub struct ContextManager {
    config: ContextConfig,
    max_context_tokens: usize,
    reserved_tokens: usize,
    router: Option<Arc<ModelRouter>>,
}

impl ContextManager {
    pub fn new(agent: &AgentConfig, config: ContextConfig) -> Self {
        Self {
            config,
            max_context_tokens: agent.max_context_tokens,
            reserved_tokens: agent.reserved_tokens,
            router: None,
        }
    }

    /// Use the router's model table to tighten the budget for known models.
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Usable tokens for `model_id` (or the configured window when unknown).
    pub fn budget(&self, model_id: Option<&str>) -> usize {
        let mut window = self.max_context_tokens;
        if let (Some(router), Some(model)) = (&self.router, model_id)
            && let Some(model_window) = router.context_window(model)
        {
            window = window.min(model_window);
        }
        window.saturating_sub(self.reserved_tokens)
    }

    /// Total tokens of system prompt plus history.
    pub fn total_tokens(messages: &[Message], system_prompt: &str) -> usize {
        estimate_tokens(system_prompt) + messages.iter().map(estimate_message_tokens).sum::<usize>()
    }

    pub fn needs_compaction(&self, messages: &[Message], system_prompt: &str, model_id: Option<&str>) -> bool {
        Self::total_tokens(messages, system_prompt) > self.budget(model_id)
    }

    /// Shrink `messages` until they fit the budget for `model_id`.
    ///
    /// If nothing removable is left the smallest achievable history is
    /// returned even though it is still over budget.
    pub fn compress_history(
        &self,
        messages: &[Message],
        system_prompt: &str,
        model_id: Option<&str>,
    ) -> CompressionResult {
        let budget = self.budget(model_id);
        let original_tokens = Self::total_tokens(messages, system_prompt);

        if messages.is_empty() || original_tokens <= budget {
            return CompressionResult {
                messages: messages.to_vec(),
                compressed_token_count: original_tokens,
                original_token_count: original_tokens,
                removed_messages: 0,
                compression_ratio: 1.0,
                strategy_used: None,
                summarized: false,
            };
        }

        let n = messages.len();
        let head_len = usize::from(self.config.keep_first_last && n >= 2);
        let head = &messages[..head_len];
        let tail_start = tail_start(messages, head_len);
        let middle = &messages[head_len..tail_start];
        let tail = &messages[tail_start..];

        let fixed_tokens = estimate_tokens(system_prompt)
            + head.iter().map(estimate_message_tokens).sum::<usize>()
            + tail.iter().map(estimate_message_tokens).sum::<usize>();

        // suffix[i] = tokens of middle[i..]
        let mut suffix = vec![0usize; middle.len() + 1];
        for i in (0..middle.len()).rev() {
            suffix[i] = suffix[i + 1] + estimate_message_tokens(&middle[i]);
        }

        let strategy = self.config.strategy;
        let summary_cap = self.config.summary_max_tokens.min(budget / 4).max(1);
        let first_k = match strategy {
            CompressionStrategy::Summarize => middle.len(),
            CompressionStrategy::DropOldest | CompressionStrategy::Hybrid => 1,
        };

        let mut chosen: Option<(usize, Option<Message>)> = None;
        let mut k = first_k.min(middle.len());
        while k <= middle.len() && !middle.is_empty() {
            let cut = skip_orphaned_tool_results(middle, k);
            let summary = match strategy {
                CompressionStrategy::DropOldest => None,
                _ => Some(summarize(&middle[..cut], summary_cap)),
            };
            let summary_tokens = summary.as_ref().map(estimate_message_tokens).unwrap_or(0);
            if fixed_tokens + summary_tokens + suffix[cut] <= budget {
                chosen = Some((cut, summary));
                break;
            }
            k = cut + 1;
        }

        // Nothing fit: keep only the pinned messages, without a summary.
        let (cut, summary) = chosen.unwrap_or((middle.len(), None));

        let mut out = Vec::with_capacity(head.len() + 1 + (middle.len() - cut) + tail.len());
        out.extend_from_slice(head);
        let summarized = summary.is_some();
        out.extend(summary);
        out.extend_from_slice(&middle[cut..]);
        out.extend_from_slice(tail);

        let compressed_tokens = Self::total_tokens(&out, system_prompt);
        let retained = n - cut;

        tracing::debug!(
            strategy = %strategy,
            budget,
            tokens_before = original_tokens,
            tokens_after = compressed_tokens,
            removed = cut,
            summarized,
            "History compacted"
        );

        CompressionResult {
            messages: out,
            compressed_token_count: compressed_tokens,
            original_token_count: original_tokens,
            removed_messages: cut,
            compression_ratio: retained as f64 / n as f64,
            strategy_used: Some(strategy),
            summarized,
        }
    }
}

/// Start of the pinned tail: the newest message, pulled back over trailing
/// tool results to the assistant message that requested them.
fn tail_start(messages: &[Message], head_len: usize) -> usize {
    let mut start = messages.len() - 1;
    while start > head_len && messages[start].role == Role::Tool {
        start -= 1;
    }
    start
}

/// Advance a cut point past tool results whose calling message is dropped.
fn skip_orphaned_tool_results(middle: &[Message], mut cut: usize) -> usize {
    while cut < middle.len() && middle[cut].role == Role::Tool {
        cut += 1;
    }
    cut
}

/// Fold `dropped` into one system message of at most `cap_tokens` tokens.
fn summarize(dropped: &[Message], cap_tokens: usize) -> Message {
    let max_chars = cap_tokens.saturating_sub(MESSAGE_OVERHEAD).max(1) * 4;
    let mut text = format!("[Summary of {} earlier messages]", dropped.len());

    for msg in dropped {
        let body = if msg.content.trim().is_empty() && !msg.tool_calls.is_empty() {
            let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
            format!("called {}", names.join(", "))
        } else {
            msg.content.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        let line = format!("\n- {}: {}", msg.role, truncate_chars(&body, SNIPPET_CHARS));
        if text.len() + line.len() > max_chars {
            text.push_str("\n- …");
            break;
        }
        text.push_str(&line);
    }

    let text = truncate_chars(&text, max_chars);
    Message::system(text).with_metadata(SUMMARY_METADATA_KEY, serde_json::Value::Bool(true))
}

fn truncate_chars(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
