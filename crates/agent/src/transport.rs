//! Streaming transport adapter.
//!
//! Spawns a run and exposes its event stream as named frames that a
//! gateway can forward over SSE or WebSocket unchanged.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use steerclaw_core::agent::AgentResult;
use steerclaw_core::error::{Error, Result};
use steerclaw_core::event::AgentEvent;
use steerclaw_core::stream::EventStream;
use tokio::task::JoinHandle;

use crate::loop_runner::{AgentLoop, RunOptions};
use crate::run_queue::RunQueue;

/// One event ready for the wire: its type name plus the JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl TransportFrame {
    pub fn from_event(event: &AgentEvent) -> Self {
        let data = serde_json::to_value(event).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": format!("unserializable event: {e}") })
        });
        Self {
            event: event.event_type().to_string(),
            data,
        }
    }

    /// Server-sent-events encoding.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

pub struct StreamingAdapter {
    agent: Arc<AgentLoop>,
}

impl StreamingAdapter {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self { agent }
    }

    /// Spawn `prompt` on the runtime and return a handle to watch it.
    pub fn start(&self, prompt: &str, system_prompt: &str, mut options: RunOptions) -> StreamingRun {
        let run_id = options.run_id.clone().unwrap_or_else(RunQueue::create_run_id);
        let stream = options.stream.clone().unwrap_or_else(EventStream::for_run);
        options.run_id = Some(run_id.clone());
        options.stream = Some(stream.clone());

        let agent = Arc::clone(&self.agent);
        let prompt = prompt.to_string();
        let system_prompt = system_prompt.to_string();
        let handle = tokio::spawn(async move { agent.run(&prompt, &system_prompt, options).await });

        StreamingRun {
            run_id,
            stream,
            handle,
        }
    }
}

pub struct StreamingRun {
    run_id: String,
    stream: EventStream,
    handle: JoinHandle<Result<AgentResult>>,
}

impl StreamingRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The raw event stream; each call can subscribe independently.
    pub fn events(&self) -> EventStream {
        self.stream.clone()
    }

    /// Frames from the start of the run, ending after `agent_end`.
    pub fn frames(&self) -> impl Stream<Item = TransportFrame> + Send + 'static {
        self.stream
            .subscribe()
            .into_stream()
            .map(|event| TransportFrame::from_event(&event))
    }

    pub async fn result(self) -> Result<AgentResult> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("run {} task failed: {e}", self.run_id)))?
    }
}
