//! Run middleware: hooks composed around [`AgentLoop::run`](crate::AgentLoop::run).
//!
//! A middleware can rewrite the system prompt before the first turn, inject
//! messages or stop the run at each turn boundary, and observe the result
//! before `agent_end` is emitted. Hooks never fail a run: problems are
//! logged and the run carries on.

use std::sync::Arc;

use async_trait::async_trait;
use steerclaw_config::MemoryConfig;
use steerclaw_core::agent::{AgentConfig, AgentResult, RunStatus};
use steerclaw_core::event::EventKind;
use steerclaw_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use steerclaw_core::message::Message;
use tracing::{debug, warn};

use crate::loop_runner::EventEmitter;
use crate::steering::{SteeringController, SteeringRegistry};

/// What a run hook can see about the run it is attached to.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub session_id: &'a str,
    pub prompt: &'a str,
    pub config: &'a AgentConfig,
}

/// Decision taken at a turn boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDirective {
    Continue,
    /// Append these messages to history before the turn starts
    Inject(Vec<Message>),
    /// Stop the run as aborted
    Interrupt(String),
}

#[async_trait]
pub trait RunMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before_run(&self, _ctx: &RunContext<'_>, _system_prompt: &mut String, _events: &EventEmitter) {}

    /// Called before every turn, `turn` being the one about to start.
    async fn on_turn_boundary(&self, _ctx: &RunContext<'_>, _turn: u32) -> TurnDirective {
        TurnDirective::Continue
    }

    async fn after_run(&self, _ctx: &RunContext<'_>, _result: &AgentResult, _events: &EventEmitter) {}
}

/// Feeds a session's steering queue into its running loop.
///
/// An interrupt wins over pending messages; whatever is still queued is
/// picked up by the session's next run.
pub struct SteeringMiddleware {
    source: SteeringSource,
}

enum SteeringSource {
    Single(Arc<SteeringController>),
    PerSession(Arc<SteeringRegistry>),
}

impl SteeringMiddleware {
    /// Steer every run through one controller.
    pub fn new(controller: Arc<SteeringController>) -> Self {
        Self {
            source: SteeringSource::Single(controller),
        }
    }

    /// Steer each run through its own session's controller.
    pub fn per_session(registry: Arc<SteeringRegistry>) -> Self {
        Self {
            source: SteeringSource::PerSession(registry),
        }
    }

    fn controller(&self, session_id: &str) -> Option<Arc<SteeringController>> {
        match &self.source {
            SteeringSource::Single(controller) => Some(controller.clone()),
            SteeringSource::PerSession(registry) => registry.get(session_id),
        }
    }
}

#[async_trait]
impl RunMiddleware for SteeringMiddleware {
    fn name(&self) -> &str {
        "steering"
    }

    async fn on_turn_boundary(&self, ctx: &RunContext<'_>, turn: u32) -> TurnDirective {
        let Some(controller) = self.controller(ctx.session_id) else {
            return TurnDirective::Continue;
        };
        if controller.clear_interrupt() {
            return TurnDirective::Interrupt("interrupted by steering".into());
        }
        let pending = controller.drain_pending();
        if pending.is_empty() {
            return TurnDirective::Continue;
        }
        debug!(run_id = %ctx.run_id, turn, count = pending.len(), "Applying steering messages");
        TurnDirective::Inject(pending.into_iter().map(|m| m.message).collect())
    }
}

/// Recalls related memories into the system prompt and saves a short
/// exchange summary once a run completes.
pub struct MemoryMiddleware {
    backend: Arc<dyn MemoryBackend>,
    recall_limit: usize,
    auto_save: bool,
}

/// Exchanges shorter than this on either side are not worth remembering.
const MIN_SAVE_CHARS: usize = 10;

impl MemoryMiddleware {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            recall_limit: 3,
            auto_save: false,
        }
    }

    pub fn from_config(backend: Arc<dyn MemoryBackend>, config: &MemoryConfig) -> Self {
        Self {
            backend,
            recall_limit: config.recall_limit,
            auto_save: config.auto_save,
        }
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Render recalled memories as a system-prompt section.
    pub fn format_memory_context(memories: &[MemoryEntry]) -> String {
        if memories.is_empty() {
            return String::new();
        }
        let mut section = String::from("\n\n## Recalled Memories\n");
        for (i, memory) in memories.iter().enumerate() {
            section.push_str(&format!("{}. [score={:.2}] {}\n", i + 1, memory.score, memory.content));
        }
        section
    }
}

#[async_trait]
impl RunMiddleware for MemoryMiddleware {
    fn name(&self) -> &str {
        "memory"
    }

    async fn before_run(&self, ctx: &RunContext<'_>, system_prompt: &mut String, events: &EventEmitter) {
        if self.recall_limit == 0 || ctx.prompt.trim().is_empty() {
            return;
        }
        let query = MemoryQuery::new(ctx.prompt).with_limit(self.recall_limit);
        match self.backend.search(query).await {
            Ok(memories) => {
                events.emit(EventKind::MemorySearch {
                    query: ctx.prompt.to_string(),
                    hits: memories.len(),
                });
                if !memories.is_empty() {
                    debug!(run_id = %ctx.run_id, count = memories.len(), "Recalled memories for context");
                    system_prompt.push_str(&Self::format_memory_context(&memories));
                }
            }
            Err(e) => warn!(run_id = %ctx.run_id, backend = self.backend.name(), "Memory recall failed: {e}"),
        }
    }

    async fn after_run(&self, ctx: &RunContext<'_>, result: &AgentResult, events: &EventEmitter) {
        if !self.auto_save || result.status != RunStatus::Completed {
            return;
        }
        let question = ctx.prompt.trim();
        let answer = result.response.trim();
        if question.chars().count() < MIN_SAVE_CHARS || answer.chars().count() < MIN_SAVE_CHARS {
            return;
        }

        let entry = MemoryEntry::new(format!("User asked: {question}\nAssistant answered: {answer}"))
            .with_tags(vec!["conversation".into(), "auto-saved".into()])
            .with_source(ctx.session_id);
        match self.backend.store(entry).await {
            Ok(memory_id) => {
                debug!(run_id = %ctx.run_id, memory_id = %memory_id, "Auto-saved exchange to memory");
                events.emit(EventKind::MemorySave { memory_id });
            }
            Err(e) => warn!(run_id = %ctx.run_id, "Failed to auto-save to memory: {e}"),
        }
    }
}
