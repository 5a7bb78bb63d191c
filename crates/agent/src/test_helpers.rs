//! Shared test doubles for the agent crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use steerclaw_core::error::{ProviderError, ToolError};
use steerclaw_core::event::AgentEvent;
use steerclaw_core::message::Message;
use steerclaw_core::provider::{
    CompletionOptions, CompletionProvider, CompletionResponse, DeltaSink, StreamDelta, ToolDefinition,
};
use steerclaw_core::tool::{Tool, ToolExecutionContext, ToolOutput, ToolRegistry};

use crate::loop_runner::RunOptions;

type Script = Result<CompletionResponse, ProviderError>;

/// Replays scripted responses, streaming each answer's text as deltas.
///
/// Panics when asked for more responses than were scripted, unless built
/// with [`ScriptedProvider::repeating`].
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    repeat: Option<CompletionResponse>,
    chunks: usize,
    thinking: Option<String>,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
    offered: Arc<Mutex<Vec<usize>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            chunks: 1,
            thinking: None,
            delay: None,
            seen: Arc::default(),
            offered: Arc::default(),
            prompts: Arc::default(),
        }
    }

    /// Returns `response` on every call.
    pub fn repeating(response: CompletionResponse) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.repeat = Some(response);
        provider
    }

    /// Split answer text into `n` deltas.
    pub fn with_chunks(mut self, n: usize) -> Self {
        self.chunks = n.max(1);
        self
    }

    pub fn with_thinking(mut self, thinking: &str) -> Self {
        self.thinking = Some(thinking.to_string());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// History passed to each call.
    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.seen.clone()
    }

    /// Number of tool definitions offered on each call.
    pub fn offered_tools(&self) -> Arc<Mutex<Vec<usize>>> {
        self.offered.clone()
    }

    pub fn system_prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

fn split_chunks(text: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = chars.len().div_ceil(n).max(1);
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        history: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
        _options: &CompletionOptions,
        on_delta: DeltaSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.seen.lock().unwrap().push(history.to_vec());
        self.offered.lock().unwrap().push(tools.len());
        self.prompts.lock().unwrap().push(system_prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = match &self.repeat {
            Some(response) => Ok(response.clone()),
            None => self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedProvider: no more responses"),
        };
        let response = next?;

        if let Some(thinking) = &self.thinking {
            on_delta(StreamDelta::Thinking(thinking.clone()));
        }
        if !response.content.is_empty() {
            for chunk in split_chunks(&response.content, self.chunks) {
                on_delta(StreamDelta::Text(chunk));
            }
        }
        Ok(response)
    }
}

/// Echoes `args["text"]` and reports the context it was given.
pub struct EchoTool {
    name: String,
    dangerous: bool,
    gated: bool,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dangerous: false,
            gated: false,
        }
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    fn requires_approval(&self) -> bool {
        self.gated
    }

    fn dangerous(&self) -> bool {
        self.dangerous
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default().to_string();
        Ok(ToolOutput {
            content: text,
            data: Some(serde_json::json!({
                "session_id": context.session_id,
                "run_id": context.run_id,
                "workspace_root": context.workspace_root.display().to_string(),
                "correlation_id": context.correlation_id,
            })),
        })
    }
}

/// Always fails with "bad input".
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _context: &ToolExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        Err(ToolError::InvalidArguments("bad input".into()))
    }
}

/// Panics with "kaboom".
pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _context: &ToolExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        panic!("kaboom")
    }
}

pub fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

pub type EventLog = Arc<Mutex<Vec<AgentEvent>>>;

/// Attach a callback that records every event of the run.
pub fn collect_events(mut options: RunOptions) -> (RunOptions, EventLog) {
    let log: EventLog = Arc::default();
    let sink = log.clone();
    options.on_event = Some(Arc::new(move |event: &AgentEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    (options, log)
}

pub fn event_types(log: &EventLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .map(|e| e.event_type().to_string())
        .collect()
}
