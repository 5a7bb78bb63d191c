//! # SteerClaw Core
//!
//! Domain types, traits, and error definitions for the SteerClaw assistant
//! runtime. This crate has **no orchestration logic**: it defines the domain
//! model that the agent, provider, and memory crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`CompletionProvider`]: the language-model backend
//! - [`ToolExecutor`]: the concrete tool implementations
//! - [`SessionStore`]: durable storage of session history
//! - [`MemoryBackend`]: recall of prior sessions
//!
//! Implementations live in their respective crates (or outside the workspace
//! entirely), which keeps the dependency graph pointing inward at core.

pub mod agent;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod plan;
pub mod provider;
pub mod session;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, AgentResult, RunStatus, ToolExecutionResult};
pub use error::{
    Error, MemoryError, ProviderError, Result, RoutingError, SessionError, ToolError,
};
pub use event::{AgentEvent, EventKind};
pub use memory::{MemoryBackend, MemoryEntry, MemoryQuery};
pub use message::{Message, MessageToolCall, Role};
pub use plan::{StepStatus, SummaryPatch, TaskPlan, TaskPlanStep, WorkingSummary};
pub use provider::{
    CompletionOptions, CompletionProvider, CompletionResponse, DeltaSink, StreamDelta, Usage,
};
pub use session::{SessionRecord, SessionStore};
pub use stream::{EventStream, EventSubscriber};
pub use tool::{
    Tool, ToolDefinition, ToolExecutionContext, ToolExecutor, ToolOutput, ToolRegistry,
};
