//! The core agent loop: the heart of SteerClaw.
//!
//! One [`AgentLoop::run`] drives a prompt through repeated turns:
//! 1. Checkpoint: cancellation, deadline, then middleware turn hooks
//! 2. Plan (first turn only) and compact history if over budget
//! 3. Stream a completion from the provider
//! 4. Dispatch any tool calls through the [`ToolBridge`]
//! 5. Stop when the model answers without tools, or a limit is hit
//!
//! Every step is surfaced as an [`AgentEvent`]; `agent_start` is always the
//! first event of a run and `agent_end` always the last.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use steerclaw_core::agent::{AgentConfig, AgentResult, RunStatus, ToolExecutionResult};
use steerclaw_core::error::{Error, ProviderError, Result};
use steerclaw_core::event::{AgentEvent, EventKind};
use steerclaw_core::message::{Message, Role};
use steerclaw_core::plan::{SummaryPatch, TaskPlan, WorkingSummary};
use steerclaw_core::provider::{CompletionOptions, CompletionProvider, StreamDelta, ToolDefinition};
use steerclaw_core::stream::EventStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ContextManager;
use crate::middleware::{RunContext, RunMiddleware, TurnDirective};
use crate::planner::TaskPlanner;
use crate::run_queue::RunQueue;
use crate::tool_bridge::{ToolBridge, ToolInvocation};

/// Returned when the turn limit ends a run before the model produced text.
pub const MAX_TURNS_FALLBACK: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Stamps events with the run's ids and fans them out to the run's
/// stream and optional callback, in emission order.
#[derive(Clone)]
pub struct EventEmitter {
    run_id: String,
    session_id: String,
    stream: EventStream,
    on_event: Option<EventCallback>,
}

impl EventEmitter {
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>, stream: EventStream) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            stream,
            on_event: None,
        }
    }

    pub fn with_callback(mut self, on_event: Option<EventCallback>) -> Self {
        self.on_event = on_event;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    pub fn emit(&self, kind: EventKind) {
        let event = AgentEvent::new(kind).correlated(&self.run_id, &self.session_id);
        if let Some(on_event) = &self.on_event {
            on_event(&event);
        }
        self.stream.push(event);
    }
}

/// Per-run inputs besides the prompt.
#[derive(Clone)]
pub struct RunOptions {
    /// Generated when absent
    pub run_id: Option<String>,
    pub session_id: String,
    /// Prior conversation; the prompt is appended as a user message
    pub history: Vec<Message>,
    /// Offer these definitions instead of the bridge's catalog
    pub tools: Option<Vec<ToolDefinition>>,
    pub cancel: CancellationToken,
    pub on_event: Option<EventCallback>,
    /// Push events here instead of a fresh stream
    pub stream: Option<EventStream>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            session_id: "default".into(),
            history: Vec::new(),
            tools: None,
            cancel: CancellationToken::new(),
            on_event: None,
            stream: None,
        }
    }
}

impl RunOptions {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }
}

/// Why the turn loop stopped.
enum Stop {
    Answered,
    MaxTurns,
    Timeout,
    Aborted(String),
    ProviderFailed(ProviderError),
}

/// Mutable state of one run.
struct RunState {
    messages: Vec<Message>,
    turns: u32,
    tool_calls_made: u32,
    executions: Vec<ToolExecutionResult>,
    last_text: String,
    plan: Option<TaskPlan>,
    summary: Option<WorkingSummary>,
    limit_warned: bool,
}

pub struct AgentLoop {
    provider: Arc<dyn CompletionProvider>,
    tools: Arc<ToolBridge>,
    config: AgentConfig,
    context: ContextManager,
    planner: TaskPlanner,
    middleware: Vec<Arc<dyn RunMiddleware>>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn CompletionProvider>, tools: Arc<ToolBridge>, config: AgentConfig) -> Self {
        let context = ContextManager::new(&config, Default::default());
        let planner = TaskPlanner::new(&config, Default::default());
        Self {
            provider,
            tools,
            config,
            context,
            planner,
            middleware: Vec::new(),
        }
    }

    pub fn with_context_manager(mut self, context: ContextManager) -> Self {
        self.context = context;
        self
    }

    pub fn with_planner(mut self, planner: TaskPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Middleware runs in the order added.
    pub fn with_middleware(mut self, middleware: Arc<dyn RunMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run `prompt` to completion.
    ///
    /// Aborts, timeouts and turn limits still produce an [`AgentResult`]
    /// with the matching status. A provider failure ends the run with an
    /// `agent_end` carrying status `error` and is returned as `Err`.
    pub async fn run(&self, prompt: &str, system_prompt: &str, options: RunOptions) -> Result<AgentResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_id = options.run_id.unwrap_or_else(RunQueue::create_run_id);
        let stream = options.stream.unwrap_or_else(EventStream::for_run);
        let events = EventEmitter::new(&run_id, &options.session_id, stream).with_callback(options.on_event);
        let cancel = options.cancel;

        info!(
            run_id = %run_id,
            session_id = %options.session_id,
            model = %self.config.model,
            history = options.history.len(),
            "Starting run"
        );
        events.emit(EventKind::AgentStart {
            model: self.config.model.clone(),
        });

        let ctx = RunContext {
            run_id: &run_id,
            session_id: &options.session_id,
            prompt,
            config: &self.config,
        };

        let mut base_prompt = system_prompt.to_string();
        for middleware in &self.middleware {
            middleware.before_run(&ctx, &mut base_prompt, &events).await;
        }

        let tool_defs = match options.tools {
            Some(tools) => tools,
            None => self.tools.get_tool_definitions().await.unwrap_or_else(|e| {
                warn!(run_id = %run_id, error = %e, "Tool catalog unavailable, running without tools");
                events.emit(EventKind::Warning {
                    message: format!("tool catalog unavailable: {e}"),
                });
                Vec::new()
            }),
        };

        let mut messages = options.history;
        messages.push(Message::user(prompt));
        let mut state = RunState {
            messages,
            turns: 0,
            tool_calls_made: 0,
            executions: Vec::new(),
            last_text: String::new(),
            plan: None,
            summary: None,
            limit_warned: false,
        };

        let deadline = Duration::from_millis(self.config.timeout_ms);
        let stop = loop {
            if let Some(stop) = self.checkpoint(&ctx, &cancel, started, deadline, &mut state, &events).await {
                break stop;
            }

            state.turns += 1;
            let turn = state.turns;
            events.emit(EventKind::TurnStart { turn });
            debug!(run_id = %run_id, turn, "Turn started");

            if turn == 1 {
                self.maybe_plan(prompt, &base_prompt, &mut state, &events);
            }
            let system_prompt = match &state.plan {
                Some(plan) => format!("{base_prompt}\n\n{}", plan.render()),
                None => base_prompt.clone(),
            };

            self.maybe_compact(&system_prompt, &mut state, &events);

            let offered: &[ToolDefinition] = if state.tool_calls_made >= self.config.max_tool_calls {
                &[]
            } else {
                &tool_defs
            };
            let response = match self.stream_completion(&ctx, &system_prompt, offered, &state.messages, &events).await {
                Ok(response) => response,
                Err(e) => {
                    events.emit(EventKind::TurnEnd { turn, tool_calls: 0 });
                    break Stop::ProviderFailed(e);
                }
            };

            if !response.content.is_empty() {
                state.last_text = response.content.clone();
            }
            let mut assistant = Message::assistant(&response.content);
            assistant.tool_calls = response.tool_calls.clone();
            state.messages.push(assistant);

            if response.tool_calls.is_empty() {
                events.emit(EventKind::TurnEnd { turn, tool_calls: 0 });
                if response.content.trim().is_empty() {
                    warn!(run_id = %run_id, turn, "Model returned an empty answer");
                    events.emit(EventKind::Warning {
                        message: "model returned an empty final answer".into(),
                    });
                }
                break Stop::Answered;
            }

            let calls = response.tool_calls.len();
            self.dispatch_tools(&ctx, &cancel, response.tool_calls, &mut state, &events).await;
            events.emit(EventKind::TurnEnd { turn, tool_calls: calls });

            if turn >= self.config.max_turns {
                warn!(run_id = %run_id, turns = turn, "Max turns reached");
                break Stop::MaxTurns;
            }
        };

        let (status, error, response) = match &stop {
            Stop::Answered => (RunStatus::Completed, None, state.last_text.clone()),
            Stop::MaxTurns => {
                let text = if state.last_text.is_empty() {
                    MAX_TURNS_FALLBACK.to_string()
                } else {
                    state.last_text.clone()
                };
                (RunStatus::Completed, None, text)
            }
            Stop::Timeout => (
                RunStatus::Timeout,
                Some(Error::Timeout {
                    timeout_ms: self.config.timeout_ms,
                }
                .to_string()),
                state.last_text.clone(),
            ),
            Stop::Aborted(reason) => (RunStatus::Aborted, Some(reason.clone()), state.last_text.clone()),
            Stop::ProviderFailed(e) => (RunStatus::Error, Some(e.to_string()), state.last_text.clone()),
        };

        let result = AgentResult {
            response,
            tool_executions: state.executions,
            messages: state.messages,
            turns: state.turns,
            duration_ms: started.elapsed().as_millis() as u64,
            run_id: run_id.clone(),
            session_id: ctx.session_id.to_string(),
            started_at,
            ended_at: Utc::now(),
            status,
            error: error.clone(),
            plan: state.plan,
            summary: state.summary,
        };

        for middleware in &self.middleware {
            middleware.after_run(&ctx, &result, &events).await;
        }

        if let Some(message) = &error {
            events.emit(EventKind::Error {
                message: message.clone(),
            });
        }
        info!(
            run_id = %run_id,
            status = %status,
            turns = result.turns,
            tool_calls = result.tool_executions.len(),
            duration_ms = result.duration_ms,
            "Run finished"
        );
        events.emit(EventKind::AgentEnd {
            status,
            turns: result.turns,
            error,
        });

        match stop {
            Stop::ProviderFailed(e) => Err(e.into()),
            _ => Ok(result),
        }
    }

    /// The single per-iteration checkpoint. Returns why the run must stop,
    /// or applies middleware injections and lets the next turn start.
    async fn checkpoint(
        &self,
        ctx: &RunContext<'_>,
        cancel: &CancellationToken,
        started: Instant,
        deadline: Duration,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Option<Stop> {
        if cancel.is_cancelled() {
            info!(run_id = %ctx.run_id, "Run cancelled");
            return Some(Stop::Aborted("run cancelled".into()));
        }
        if started.elapsed() >= deadline {
            warn!(run_id = %ctx.run_id, timeout_ms = self.config.timeout_ms, "Run deadline passed");
            return Some(Stop::Timeout);
        }

        let next_turn = state.turns + 1;
        for middleware in &self.middleware {
            match middleware.on_turn_boundary(ctx, next_turn).await {
                TurnDirective::Continue => {}
                TurnDirective::Interrupt(reason) => {
                    info!(run_id = %ctx.run_id, middleware = middleware.name(), %reason, "Run interrupted");
                    return Some(Stop::Aborted(reason));
                }
                TurnDirective::Inject(injected) => {
                    for message in injected {
                        debug!(run_id = %ctx.run_id, middleware = middleware.name(), "Injecting message");
                        events.emit(EventKind::MessageStart { role: message.role });
                        events.emit(EventKind::MessageEnd {
                            role: message.role,
                            content: message.content.clone(),
                        });
                        state.messages.push(message);
                    }
                }
            }
        }
        None
    }

    fn maybe_plan(&self, prompt: &str, system_prompt: &str, state: &mut RunState, events: &EventEmitter) {
        let decision = self.planner.should_plan(prompt, system_prompt);
        if !decision.should_plan {
            return;
        }
        let plan = self.planner.create_plan(prompt);
        debug!(reason = %decision.reason, steps = plan.steps.len(), "Plan created");
        events.emit(EventKind::PlanCreated {
            reason: decision.reason.to_string(),
            plan: plan.clone(),
        });
        let mut summary = WorkingSummary::default();
        self.planner
            .update_working_summary(&mut summary, SummaryPatch::default(), Some(&plan));
        state.plan = Some(plan);
        state.summary = Some(summary);
    }

    fn maybe_compact(&self, system_prompt: &str, state: &mut RunState, events: &EventEmitter) {
        let model = Some(self.config.model.as_str());
        if !self.context.needs_compaction(&state.messages, system_prompt, model) {
            return;
        }
        let budget = self.context.budget(model);
        let result = self.context.compress_history(&state.messages, system_prompt, model);
        let Some(strategy) = result.strategy_used else {
            return;
        };

        info!(
            strategy = %strategy,
            tokens_before = result.original_token_count,
            tokens_after = result.compressed_token_count,
            removed = result.removed_messages,
            "Compacted history"
        );
        events.emit(EventKind::Compaction {
            strategy: strategy.to_string(),
            tokens_before: result.original_token_count,
            tokens_after: result.compressed_token_count,
            removed_messages: result.removed_messages,
        });
        events.emit(EventKind::ContextReplace {
            before_count: state.messages.len(),
            after_count: result.messages.len(),
            reason: format!(
                "context of {} tokens exceeds budget of {budget}",
                result.original_token_count
            ),
        });
        if !result.fits(budget) {
            events.emit(EventKind::Warning {
                message: format!(
                    "history still {} tokens after compaction (budget {budget})",
                    result.compressed_token_count
                ),
            });
        }
        state.messages = result.messages;
    }

    /// One provider round-trip, framed by assistant `message_start` and
    /// `message_end` events whatever the outcome.
    async fn stream_completion(
        &self,
        ctx: &RunContext<'_>,
        system_prompt: &str,
        tools: &[ToolDefinition],
        history: &[Message],
        events: &EventEmitter,
    ) -> std::result::Result<steerclaw_core::provider::CompletionResponse, ProviderError> {
        let options = CompletionOptions {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: None,
            run_id: Some(ctx.run_id.to_string()),
            session_id: Some(ctx.session_id.to_string()),
        };

        let thinking_started = AtomicBool::new(false);
        let thinking = Mutex::new(String::new());
        let on_delta = |delta: StreamDelta| match delta {
            StreamDelta::Text(text) => events.emit(EventKind::MessageUpdate {
                role: Role::Assistant,
                delta: text,
            }),
            StreamDelta::Thinking(text) => {
                if !thinking_started.swap(true, Ordering::SeqCst) {
                    events.emit(EventKind::ThinkingStart);
                }
                thinking
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_str(&text);
                events.emit(EventKind::ThinkingDelta { delta: text });
            }
        };

        events.emit(EventKind::MessageStart { role: Role::Assistant });
        let outcome = self
            .provider
            .complete(history, system_prompt, tools, &options, &on_delta)
            .await;

        if thinking_started.load(Ordering::SeqCst) {
            let content = thinking.into_inner().unwrap_or_else(PoisonError::into_inner);
            events.emit(EventKind::ThinkingEnd { content });
        }

        match outcome {
            Ok(response) => {
                events.emit(EventKind::MessageEnd {
                    role: Role::Assistant,
                    content: response.content.clone(),
                });
                if let Some(usage) = &response.usage {
                    debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Provider usage"
                    );
                }
                Ok(response)
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, provider = self.provider.name(), error = %e, "Completion failed");
                events.emit(EventKind::MessageEnd {
                    role: Role::Assistant,
                    content: String::new(),
                });
                Err(e)
            }
        }
    }

    /// Execute the turn's tool calls in order. Failures become tool-role
    /// messages so the model can recover; nothing here ends the run.
    async fn dispatch_tools(
        &self,
        ctx: &RunContext<'_>,
        cancel: &CancellationToken,
        calls: Vec<steerclaw_core::message::MessageToolCall>,
        state: &mut RunState,
        events: &EventEmitter,
    ) {
        let mut patch = SummaryPatch::default();

        for call in calls {
            if cancel.is_cancelled() {
                state
                    .messages
                    .push(Message::tool_result(&call.id, "Skipped: the run was cancelled."));
                continue;
            }

            if state.tool_calls_made >= self.config.max_tool_calls {
                if !state.limit_warned {
                    state.limit_warned = true;
                    warn!(run_id = %ctx.run_id, limit = self.config.max_tool_calls, "Tool call limit reached");
                    events.emit(EventKind::Warning {
                        message: format!("tool call limit of {} reached", self.config.max_tool_calls),
                    });
                }
                state.messages.push(Message::tool_result(
                    &call.id,
                    "Error: tool call limit reached for this run; answer with what you have.",
                ));
                continue;
            }
            state.tool_calls_made += 1;

            events.emit(EventKind::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
            });

            let started = Instant::now();
            let outcome = self
                .tools
                .execute_tool(
                    &call.name,
                    call.arguments.clone(),
                    ToolInvocation {
                        session_id: ctx.session_id,
                        run_id: Some(ctx.run_id),
                        tool_call_id: &call.id,
                    },
                )
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            events.emit(EventKind::ToolExecutionUpdate {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                message: if outcome.is_ok() { "finished" } else { "failed" }.into(),
            });

            match outcome {
                Ok(output) => {
                    debug!(tool = %call.name, duration_ms, "Tool succeeded");
                    events.emit(EventKind::ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: output.content.clone(),
                        duration_ms,
                    });
                    patch.changes.push(format!("ran {}", call.name));
                    state.messages.push(Message::tool_result(&call.id, &output.content));
                    state.executions.push(ToolExecutionResult {
                        tool_call_id: call.id,
                        tool_name: call.name,
                        args: call.arguments,
                        result: Some(output.content),
                        error: None,
                        duration_ms,
                        success: true,
                    });
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    let error = e.to_string();
                    events.emit(EventKind::ToolError {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error: error.clone(),
                        duration_ms,
                    });
                    patch.open_questions.push(format!("{} failed: {error}", call.name));
                    state
                        .messages
                        .push(Message::tool_result(&call.id, format!("Error: {error}")));
                    state.executions.push(ToolExecutionResult {
                        tool_call_id: call.id,
                        tool_name: call.name,
                        args: call.arguments,
                        result: None,
                        error: Some(error),
                        duration_ms,
                        success: false,
                    });
                }
            }
        }

        if let (Some(plan), Some(summary)) = (state.plan.as_mut(), state.summary.as_mut()) {
            plan.advance();
            self.planner.update_working_summary(summary, patch, Some(plan));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use crate::test_helpers::{
        EchoTool, FailingTool, ScriptedProvider, collect_events, event_types, registry_with,
    };
    use steerclaw_config::ContextConfig;
    use steerclaw_core::message::MessageToolCall;
    use steerclaw_core::provider::CompletionResponse;

    fn bridge() -> Arc<ToolBridge> {
        Arc::new(
            ToolBridge::new(registry_with(vec![
                Arc::new(EchoTool::named("echo")),
                Arc::new(FailingTool),
            ]))
            .with_gate(Arc::new(AutoApprove)),
        )
    }

    fn agent(provider: ScriptedProvider) -> AgentLoop {
        AgentLoop::new(Arc::new(provider), bridge(), AgentConfig::default())
    }

    fn echo_call(id: &str, text: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "echo".into(),
            arguments: serde_json::json!({ "text": text }),
        }
    }

    #[tokio::test]
    async fn simple_answer_event_order() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("Hello"))]).with_chunks(2);
        let (options, events) = collect_events(RunOptions::for_session("s1"));

        let result = agent(provider).run("hi", "You are helpful.", options).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.response, "Hello");
        assert_eq!(result.turns, 1);

        let types = event_types(&events);
        assert_eq!(
            types,
            vec![
                "agent_start",
                "turn_start",
                "message_start",
                "message_update",
                "message_update",
                "message_end",
                "turn_end",
                "agent_end",
            ]
        );
        assert!(events.lock().unwrap().iter().all(|e| e.session_id.as_deref() == Some("s1")));
    }

    #[tokio::test]
    async fn tool_calls_are_dispatched_in_order() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse::with_tool_calls(
                "",
                vec![echo_call("c1", "one"), echo_call("c2", "two")],
            )),
            Ok(CompletionResponse::text("done")),
        ]);
        let seen = provider.seen();
        let (options, events) = collect_events(RunOptions::default());

        let result = agent(provider).run("go", "", options).await.unwrap();
        assert_eq!(result.response, "done");
        assert_eq!(result.turns, 2);
        assert_eq!(result.tool_executions.len(), 2);
        assert!(result.tool_executions.iter().all(|t| t.success));

        let events = events.lock().unwrap();
        let order: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ToolExecutionStart { tool_call_id, .. } => Some(format!("start:{tool_call_id}")),
                EventKind::ToolResult { tool_call_id, .. } => Some(format!("result:{tool_call_id}")),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["start:c1", "result:c1", "start:c2", "result:c2"]);

        // Second request sees both tool results.
        let second = &seen.lock().unwrap()[1];
        let tool_msgs: Vec<&str> = second
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_msgs, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn tool_failure_is_fed_back() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse::with_tool_calls(
                "",
                vec![MessageToolCall {
                    id: "c1".into(),
                    name: "fail".into(),
                    arguments: serde_json::json!({}),
                }],
            )),
            Ok(CompletionResponse::text("recovered")),
        ]);
        let seen = provider.seen();
        let (options, events) = collect_events(RunOptions::default());

        let result = agent(provider).run("go", "", options).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(!result.tool_executions[0].success);
        assert!(event_types(&events).contains(&"tool_execution_error".to_string()));

        let second = &seen.lock().unwrap()[1];
        let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Error:"));
        assert!(tool_msg.content.contains("bad input"));
    }

    #[tokio::test]
    async fn provider_failure_ends_with_error() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Network("down".into()))]);
        let (options, events) = collect_events(RunOptions::default());

        let err = agent(provider).run("hi", "", options).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        match &last.kind {
            EventKind::AgentEnd { status, error, .. } => {
                assert_eq!(*status, RunStatus::Error);
                assert!(error.as_deref().unwrap().contains("down"));
            }
            other => panic!("last event was {other:?}"),
        }
        // message_start still paired with message_end
        let starts = events.iter().filter(|e| e.event_type() == "message_start").count();
        let ends = events.iter().filter(|e| e.event_type() == "message_end").count();
        assert_eq!(starts, ends);
    }

    #[tokio::test]
    async fn max_turns_returns_best_effort() {
        let provider = ScriptedProvider::repeating(CompletionResponse::with_tool_calls(
            "",
            vec![echo_call("c", "again")],
        ));
        let config = AgentConfig {
            max_turns: 2,
            ..AgentConfig::default()
        };
        let result = AgentLoop::new(Arc::new(provider), bridge(), config)
            .run("loop", "", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.turns, 2);
        assert_eq!(result.response, MAX_TURNS_FALLBACK);
    }

    #[tokio::test]
    async fn tool_call_limit_stops_offering_tools() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse::with_tool_calls(
                "",
                vec![echo_call("c1", "a"), echo_call("c2", "b"), echo_call("c3", "c")],
            )),
            Ok(CompletionResponse::text("ok")),
        ]);
        let offered = provider.offered_tools();
        let config = AgentConfig {
            max_tool_calls: 2,
            ..AgentConfig::default()
        };
        let (options, events) = collect_events(RunOptions::default());
        let result = AgentLoop::new(Arc::new(provider), bridge(), config)
            .run("go", "", options)
            .await
            .unwrap();

        assert_eq!(result.tool_executions.len(), 2);
        let limited = result
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c3"))
            .unwrap();
        assert!(limited.content.contains("limit reached"));
        assert!(event_types(&events).contains(&"warning".to_string()));

        let offered = offered.lock().unwrap();
        assert_eq!(offered[0], 2);
        assert_eq!(offered[1], 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_aborted() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("never"))]);
        let seen = provider.seen();
        let options = RunOptions::default();
        options.cancel.cancel();
        let (options, events) = collect_events(options);

        let result = agent(provider).run("hi", "", options).await.unwrap();
        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.turns, 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(event_types(&events), vec!["agent_start", "error", "agent_end"]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_checked_at_turn_boundary() {
        let provider = ScriptedProvider::repeating(CompletionResponse::with_tool_calls(
            "partial",
            vec![echo_call("c", "x")],
        ))
        .with_delay(Duration::from_millis(80));
        let config = AgentConfig {
            timeout_ms: 100,
            ..AgentConfig::default()
        };
        let result = AgentLoop::new(Arc::new(provider), bridge(), config)
            .run("slow", "", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.turns, 2);
        assert_eq!(result.response, "partial");
    }

    #[tokio::test]
    async fn complex_prompt_creates_plan_before_completion() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("planned"))]);
        let prompts = provider.system_prompts();
        let (options, events) = collect_events(RunOptions::default());

        let result = agent(provider)
            .run("Refactor the parser:\n- split lexer\n- add tests", "base", options)
            .await
            .unwrap();
        let plan = result.plan.unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(result.summary.is_some());

        let types = event_types(&events);
        let plan_at = types.iter().position(|t| t == "plan_created").unwrap();
        let message_at = types.iter().position(|t| t == "message_start").unwrap();
        assert!(plan_at < message_at);
        assert!(prompts.lock().unwrap()[0].contains("## Current Plan"));
    }

    #[tokio::test]
    async fn over_budget_history_is_compacted() {
        let config = AgentConfig {
            max_context_tokens: 500,
            reserved_tokens: 100,
            ..AgentConfig::default()
        };
        let history: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("{i} {}", "x".repeat(190))))
            .collect();
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("fine"))]);
        let seen = provider.seen();
        let (options, events) = collect_events(RunOptions {
            history,
            ..RunOptions::default()
        });

        let agent = AgentLoop::new(Arc::new(provider), bridge(), config.clone())
            .with_context_manager(ContextManager::new(&config, ContextConfig::default()));
        agent.run("summarize", "", options).await.unwrap();

        let events = events.lock().unwrap();
        let replace = events
            .iter()
            .find_map(|e| match &e.kind {
                EventKind::ContextReplace {
                    before_count,
                    after_count,
                    ..
                } => Some((*before_count, *after_count)),
                _ => None,
            })
            .unwrap();
        assert_eq!(replace.0, 11);
        assert!(replace.1 < 11);
        assert!(seen.lock().unwrap()[0].len() < 11);
    }

    #[tokio::test]
    async fn thinking_deltas_are_bracketed() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("answer"))])
            .with_thinking("let me think");
        let (options, events) = collect_events(RunOptions::default());
        agent(provider).run("q", "", options).await.unwrap();

        let events = events.lock().unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        let start = types.iter().position(|t| *t == "thinking_start").unwrap();
        let end = types.iter().position(|t| *t == "thinking_end").unwrap();
        assert!(start < end);
        let content = events.iter().find_map(|e| match &e.kind {
            EventKind::ThinkingEnd { content } => Some(content.clone()),
            _ => None,
        });
        assert_eq!(content.as_deref(), Some("let me think"));
    }

    #[tokio::test]
    async fn events_reach_the_stream() {
        let stream = EventStream::for_run();
        let subscriber = stream.subscribe();
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("Hi"))]);
        agent(provider)
            .run(
                "hi",
                "",
                RunOptions {
                    stream: Some(stream.clone()),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(stream.is_closed());
        let events = subscriber.collect().await;
        assert_eq!(events.first().unwrap().event_type(), "agent_start");
        assert!(events.last().unwrap().is_agent_end());
    }
}
