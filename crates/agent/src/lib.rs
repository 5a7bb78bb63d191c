//! The SteerClaw agent runtime.
//!
//! A run moves through **turns** until the model answers without tools:
//!
//! 1. **Checkpoint**: cancellation, deadline, steering
//! 2. **Plan** complex prompts on the first turn
//! 3. **Compact** history that no longer fits the token budget
//! 4. **Complete**: stream the provider's answer as events
//! 5. **Act**: run requested tools through the [`ToolBridge`], feed results back
//!
//! [`RunQueue`] serializes runs per session and [`AssistantRuntime`] ties the
//! loop to a session store and per-session steering.

pub mod approval;
pub mod context;
pub mod loop_runner;
pub mod middleware;
pub mod planner;
pub mod run_queue;
pub mod runtime;
pub mod steering;
pub mod tool_bridge;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalRequest, AutoApprove, DenyAll, PendingApproval, TimedApproval,
    gate_from_config,
};
pub use context::{CompressionResult, ContextManager, SUMMARY_METADATA_KEY};
pub use loop_runner::{AgentLoop, EventCallback, EventEmitter, MAX_TURNS_FALLBACK, RunOptions};
pub use middleware::{MemoryMiddleware, RunContext, RunMiddleware, SteeringMiddleware, TurnDirective};
pub use planner::{PlanDecision, PlanReason, TaskPlanner};
pub use run_queue::{RunHandle, RunMetadata, RunOutcome, RunQueue};
pub use runtime::{AssistantRuntime, SubmittedRun};
pub use steering::{Priority, QueuedMessage, SteeringController, SteeringEvent, SteeringRegistry};
pub use tool_bridge::{ToolBridge, ToolInvocation};
pub use transport::{StreamingAdapter, StreamingRun, TransportFrame};
