//! Assistant runtime: sessions, queueing and steering around one agent loop.
//!
//! [`AssistantRuntime::submit`] loads the session's history, queues the run
//! behind the session's earlier runs, and saves the resulting history once
//! the run returns. Each session gets its own steering controller and each
//! run its own cancellation token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use steerclaw_config::AppConfig;
use steerclaw_core::agent::{AgentResult, RunStatus};
use steerclaw_core::error::Error;
use steerclaw_core::event::EventKind;
use steerclaw_core::memory::MemoryBackend;
use steerclaw_core::provider::CompletionProvider;
use steerclaw_core::session::{SessionRecord, SessionStore};
use steerclaw_core::stream::EventStream;
use steerclaw_core::tool::ToolExecutor;
use steerclaw_providers::ModelRouter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::approval::{PendingApproval, gate_from_config};
use crate::context::ContextManager;
use crate::loop_runner::{AgentLoop, EventEmitter, RunOptions};
use crate::middleware::{MemoryMiddleware, SteeringMiddleware};
use crate::planner::TaskPlanner;
use crate::run_queue::{RunHandle, RunMetadata, RunQueue};
use crate::steering::{SteeringController, SteeringRegistry};
use crate::tool_bridge::ToolBridge;

/// A run accepted by [`AssistantRuntime::submit`].
pub struct SubmittedRun {
    pub meta: RunMetadata,
    pub handle: RunHandle<AgentResult>,
    /// Receives the run's events once it starts
    pub events: EventStream,
}

type CancelMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock(map: &CancelMap) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cleanup for one submitted run. Dropping it releases the run's cancel
/// token and ends its stream if the loop never emitted `agent_end`, which
/// covers a failed session load as well as a panicking runner.
struct RunGuard {
    run_id: String,
    cancels: CancelMap,
    events: EventEmitter,
}

impl RunGuard {
    fn fail(&self, message: &str) {
        if self.events.stream().is_closed() {
            return;
        }
        self.events.emit(EventKind::Error {
            message: message.to_string(),
        });
        self.events.emit(EventKind::AgentEnd {
            status: RunStatus::Error,
            turns: 0,
            error: Some(message.to_string()),
        });
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.cancels).remove(&self.run_id);
        self.fail("run ended without finishing");
    }
}

pub struct AssistantRuntime {
    agent: Arc<AgentLoop>,
    sessions: Arc<dyn SessionStore>,
    queue: RunQueue,
    steering: Arc<SteeringRegistry>,
    cancels: CancelMap,
    system_prompt: String,
}

impl AssistantRuntime {
    /// Wrap `agent`, adding per-session steering to its middleware.
    pub fn new(agent: AgentLoop, sessions: Arc<dyn SessionStore>, steering: Arc<SteeringRegistry>) -> Self {
        let agent = agent.with_middleware(Arc::new(SteeringMiddleware::per_session(steering.clone())));
        Self {
            agent: Arc::new(agent),
            sessions,
            queue: RunQueue::new(),
            steering,
            cancels: Arc::default(),
            system_prompt: String::new(),
        }
    }

    /// Build the whole stack from configuration.
    ///
    /// The approval receiver is returned when `[approval] mode = "timed"`;
    /// whoever answers approvals should drain it.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn CompletionProvider>,
        executor: Arc<dyn ToolExecutor>,
        sessions: Arc<dyn SessionStore>,
        memory: Option<Arc<dyn MemoryBackend>>,
    ) -> (Self, Option<mpsc::Receiver<PendingApproval>>) {
        let (gate, approvals) = gate_from_config(&config.approval);
        let bridge = ToolBridge::new(executor)
            .with_gate(gate)
            .with_workspace_root(config.workspace_dir())
            .with_policy(&config.agent);

        let router = Arc::new(ModelRouter::from_config(&config.router));
        let context = ContextManager::new(&config.agent, config.context.clone()).with_router(router);
        let planner = TaskPlanner::new(&config.agent, config.planner.clone());

        let mut agent = AgentLoop::new(provider, Arc::new(bridge), config.agent.clone())
            .with_context_manager(context)
            .with_planner(planner);
        if let Some(backend) = memory
            && config.memory.enabled
        {
            agent = agent.with_middleware(Arc::new(MemoryMiddleware::from_config(backend, &config.memory)));
        }

        let steering = Arc::new(SteeringRegistry::new(Duration::from_millis(
            config.steering.processed_grace_ms,
        )));
        (Self::new(agent, sessions, steering), approvals)
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Queue `prompt` for `session_id`.
    ///
    /// History is loaded when the run starts, not when it is submitted, so
    /// a run sees everything its predecessors in the session saved.
    pub fn submit(&self, session_id: &str, prompt: &str) -> SubmittedRun {
        let run_id = RunQueue::create_run_id();
        let cancel = CancellationToken::new();
        lock(&self.cancels).insert(run_id.clone(), cancel.clone());
        let events = EventStream::for_run();

        let agent = Arc::clone(&self.agent);
        let sessions = Arc::clone(&self.sessions);
        let cancels = Arc::clone(&self.cancels);
        let session = session_id.to_string();
        let prompt = prompt.to_string();
        let system_prompt = self.system_prompt.clone();
        let stream = events.clone();
        let id = run_id.clone();

        let (meta, handle) = self.queue.enqueue(session_id, Some(run_id), move || async move {
            let guard = RunGuard {
                run_id: id.clone(),
                cancels,
                events: EventEmitter::new(id.clone(), session.clone(), stream.clone()),
            };
            let existing = match sessions.load(&session).await {
                Ok(existing) => existing,
                Err(e) => {
                    let e = Error::from(e);
                    guard.fail(&e.to_string());
                    return Err(e);
                }
            };
            let history = existing.as_ref().map(|r| r.messages.clone()).unwrap_or_default();
            debug!(run_id = %id, session_id = %session, history = history.len(), "Loaded session");

            let options = RunOptions {
                run_id: Some(id.clone()),
                session_id: session.clone(),
                history,
                tools: None,
                cancel,
                on_event: None,
                stream: Some(stream),
            };
            let outcome = agent.run(&prompt, &system_prompt, options).await;
            drop(guard);
            let result = outcome?;

            let mut record = existing.unwrap_or_else(|| SessionRecord::new(&session, Vec::new()));
            record.messages = result.messages.clone();
            record.updated_at = chrono::Utc::now();
            sessions.save(record).await?;
            Ok(result)
        });

        info!(run_id = %meta.run_id, session_id = %session_id, "Run submitted");
        SubmittedRun { meta, handle, events }
    }

    /// The steering controller for `session_id`, created on first use.
    pub fn steering(&self, session_id: &str) -> Arc<SteeringController> {
        self.steering.get_or_create(session_id)
    }

    /// Cancel a queued or running run. It stops at its next checkpoint.
    pub fn abort(&self, run_id: &str) -> bool {
        match lock(&self.cancels).get(run_id) {
            Some(token) => {
                info!(run_id = %run_id, "Aborting run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunMetadata> {
        self.queue.get_run(run_id)
    }

    pub fn list_runs(&self, session_id: Option<&str>) -> Vec<RunMetadata> {
        self.queue.list_runs(session_id)
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steering::Priority;
    use crate::test_helpers::{ScriptedProvider, registry_with};
    use steerclaw_core::agent::{AgentConfig, RunStatus};
    use async_trait::async_trait;
    use steerclaw_core::error::SessionError;
    use steerclaw_core::message::{Message, Role};
    use steerclaw_core::provider::CompletionResponse;
    use steerclaw_memory::InMemorySessionStore;

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
            Err(SessionError::Storage {
                session_id: session_id.to_string(),
                reason: "disk unavailable".into(),
            })
        }

        async fn save(&self, _record: SessionRecord) -> Result<(), SessionError> {
            Ok(())
        }

        async fn delete(&self, _session_id: &str) -> Result<bool, SessionError> {
            Ok(false)
        }

        async fn list(&self) -> Result<Vec<String>, SessionError> {
            Ok(Vec::new())
        }
    }

    fn runtime(provider: ScriptedProvider) -> (AssistantRuntime, InMemorySessionStore) {
        let store = InMemorySessionStore::new();
        let agent = AgentLoop::new(
            Arc::new(provider),
            Arc::new(ToolBridge::new(registry_with(vec![]))),
            AgentConfig::default(),
        );
        let runtime = AssistantRuntime::new(agent, Arc::new(store.clone()), Arc::default());
        (runtime, store)
    }

    #[tokio::test]
    async fn history_carries_across_runs() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse::text("first answer")),
            Ok(CompletionResponse::text("second answer")),
        ]);
        let seen = provider.seen();
        let (runtime, store) = runtime(provider);

        let a = runtime.submit("s1", "one");
        let b = runtime.submit("s1", "two");
        assert_eq!(a.handle.wait().await.unwrap().response, "first answer");
        assert_eq!(b.handle.wait().await.unwrap().response, "second answer");

        // The second run saw the first exchange.
        let second_history = &seen.lock().unwrap()[1];
        assert_eq!(second_history.len(), 3);
        assert_eq!(second_history[0].content, "one");
        assert_eq!(second_history[1].content, "first answer");

        let record = store.load("s1").await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 4);
        assert_eq!(runtime.list_runs(Some("s1")).len(), 2);
    }

    #[tokio::test]
    async fn events_stream_is_available_on_submit() {
        let (runtime, _) = runtime(ScriptedProvider::new(vec![Ok(CompletionResponse::text("hey"))]));
        let run = runtime.submit("s1", "hi");
        let events = run.events.subscribe().collect().await;
        assert_eq!(events.first().unwrap().event_type(), "agent_start");
        assert!(events.last().unwrap().is_agent_end());
        assert!(events.iter().all(|e| e.run_id.as_deref() == Some(run.meta.run_id.as_str())));
        run.handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn failed_session_load_still_ends_the_stream() {
        let agent = AgentLoop::new(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(ToolBridge::new(registry_with(vec![]))),
            AgentConfig::default(),
        );
        let runtime = AssistantRuntime::new(agent, Arc::new(BrokenStore), Arc::default());
        let run = runtime.submit("s1", "hi");

        let events = tokio::time::timeout(Duration::from_secs(5), run.events.subscribe().collect())
            .await
            .expect("stream never closed");
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["error", "agent_end"]);
        match &events.last().unwrap().kind {
            EventKind::AgentEnd { status, error, .. } => {
                assert_eq!(*status, RunStatus::Error);
                assert!(error.as_deref().unwrap().contains("disk unavailable"));
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
        assert!(run.handle.wait().await.is_err());
        assert_eq!(runtime.get_run(&run.meta.run_id).unwrap().status, RunStatus::Error);
        assert!(!runtime.abort(&run.meta.run_id));
    }

    #[tokio::test]
    async fn panicking_run_still_ends_the_stream() {
        // An empty script makes the provider panic on the first turn.
        let (runtime, _) = runtime(ScriptedProvider::new(vec![]));
        let run = runtime.submit("s1", "hi");

        let events = tokio::time::timeout(Duration::from_secs(5), run.events.subscribe().collect())
            .await
            .expect("stream never closed");
        assert_eq!(events.first().unwrap().event_type(), "agent_start");
        assert!(events.last().unwrap().is_agent_end());
        let err = run.handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(!runtime.abort(&run.meta.run_id));
    }

    #[tokio::test]
    async fn abort_before_start_ends_aborted() {
        let (runtime, _) = runtime(ScriptedProvider::new(vec![]));
        let run = runtime.submit("s1", "hi");
        assert!(runtime.abort(&run.meta.run_id));
        let result = run.handle.wait().await.unwrap();
        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(runtime.get_run(&run.meta.run_id).unwrap().status, RunStatus::Aborted);
        assert!(!runtime.abort(&run.meta.run_id));
    }

    #[tokio::test]
    async fn steering_messages_join_the_next_turn() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::text("ok"))]);
        let seen = provider.seen();
        let (runtime, _) = runtime(provider);

        runtime
            .steering("s1")
            .queue_message(Message::user("use metric units"), Priority::High, Default::default());
        runtime.submit("s1", "weather?").handle.wait().await.unwrap();

        let history = &seen.lock().unwrap()[0];
        let users: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(users, vec!["weather?", "use metric units"]);
        assert_eq!(runtime.steering("s1").pending_count(), 0);
    }

    #[tokio::test]
    async fn steering_interrupt_aborts_the_run() {
        let (runtime, _) = runtime(ScriptedProvider::new(vec![]));
        runtime.steering("s1").interrupt();
        let result = runtime.submit("s1", "hi").handle.wait().await.unwrap();
        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.error.as_deref(), Some("interrupted by steering"));
    }

    #[tokio::test]
    async fn from_config_wires_the_stack() {
        let config = AppConfig::default();
        let (runtime, approvals) = AssistantRuntime::from_config(
            &config,
            Arc::new(ScriptedProvider::new(vec![Ok(CompletionResponse::text("configured"))])),
            registry_with(vec![]),
            Arc::new(InMemorySessionStore::new()),
            Some(Arc::new(steerclaw_memory::InMemoryBackend::new())),
        );
        assert!(approvals.is_none());
        let result = runtime
            .with_system_prompt("Be brief.")
            .submit("s1", "hello")
            .handle
            .wait()
            .await
            .unwrap();
        assert_eq!(result.response, "configured");
    }
}
