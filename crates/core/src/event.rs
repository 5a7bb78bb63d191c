//! Run events: the ordered record of everything one agent run does.
//!
//! Every event carries the correlation ids of the run that emitted it plus a
//! timestamp; the payload is a closed [`EventKind`] union. Consumers should
//! match exhaustively so a new kind cannot be silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::RunStatus;
use crate::message::Role;
use crate::plan::TaskPlan;

/// One event emitted by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AgentEvent {
    /// An event with no correlation ids, stamped now.
    pub fn new(kind: EventKind) -> Self {
        Self {
            run_id: None,
            session_id: None,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Stamp correlation ids onto the event.
    pub fn correlated(mut self, run_id: &str, session_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Whether this event ends a run's stream.
    pub fn is_agent_end(&self) -> bool {
        matches!(self.kind, EventKind::AgentEnd { .. })
    }
}

/// Every kind of event a run can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AgentStart {
        model: String,
    },
    AgentEnd {
        status: RunStatus,
        turns: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TurnStart {
        turn: u32,
    },
    TurnEnd {
        turn: u32,
        tool_calls: usize,
    },
    MessageStart {
        role: Role,
    },
    MessageUpdate {
        role: Role,
        delta: String,
    },
    MessageEnd {
        role: Role,
        content: String,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        message: String,
    },
    #[serde(rename = "tool_execution_result")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
        duration_ms: u64,
    },
    #[serde(rename = "tool_execution_error")]
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
        duration_ms: u64,
    },
    ThinkingStart,
    ThinkingDelta {
        delta: String,
    },
    ThinkingEnd {
        content: String,
    },
    MemorySearch {
        query: String,
        hits: usize,
    },
    MemorySave {
        memory_id: String,
    },
    PlanCreated {
        reason: String,
        plan: TaskPlan,
    },
    ContextReplace {
        before_count: usize,
        after_count: usize,
        reason: String,
    },
    Compaction {
        strategy: String,
        tokens_before: usize,
        tokens_after: usize,
        removed_messages: usize,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
}

impl EventKind {
    /// Wire name for this event type (also the SSE event name).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart { .. } => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolResult { .. } => "tool_execution_result",
            Self::ToolError { .. } => "tool_execution_error",
            Self::ThinkingStart => "thinking_start",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnd { .. } => "thinking_end",
            Self::MemorySearch { .. } => "memory_search",
            Self::MemorySave { .. } => "memory_save",
            Self::PlanCreated { .. } => "plan_created",
            Self::ContextReplace { .. } => "context_replace",
            Self::Compaction { .. } => "compaction",
            Self::Error { .. } => "error",
            Self::Warning { .. } => "warning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_flattens_kind() {
        let event = AgentEvent::new(EventKind::TurnStart { turn: 1 }).correlated("run-1", "s1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"turn_start""#));
        assert!(json.contains(r#""turn":1"#));
        assert!(json.contains(r#""run_id":"run-1""#));
        assert!(json.contains(r#""session_id":"s1""#));
    }

    #[test]
    fn tool_events_use_execution_names() {
        let event = AgentEvent::new(EventKind::ToolError {
            tool_call_id: "c1".into(),
            tool_name: "shell".into(),
            error: "boom".into(),
            duration_ms: 3,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_execution_error""#));
        assert_eq!(event.event_type(), "tool_execution_error");
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let kinds = vec![
            EventKind::AgentStart { model: "m".into() },
            EventKind::MessageUpdate {
                role: Role::Assistant,
                delta: "x".into(),
            },
            EventKind::ThinkingStart,
            EventKind::ContextReplace {
                before_count: 3,
                after_count: 2,
                reason: "budget".into(),
            },
            EventKind::Warning {
                message: "w".into(),
            },
        ];
        for kind in kinds {
            let value = serde_json::to_value(AgentEvent::new(kind.clone())).unwrap();
            assert_eq!(value["type"], kind.event_type());
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","type":"agent_end","status":"timeout","turns":2}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_agent_end());
        match event.kind {
            EventKind::AgentEnd { status, turns, .. } => {
                assert_eq!(status, RunStatus::Timeout);
                assert_eq!(turns, 2);
            }
            _ => panic!("Wrong variant"),
        }
    }
}
