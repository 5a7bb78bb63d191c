//! Task plan and working summary value types.
//!
//! The planning logic lives in the agent crate; these types are shared so
//! that run results can carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlanStep {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
}

/// An ordered plan. At most one step is `InProgress` at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub goal: String,
    pub steps: Vec<TaskPlanStep>,
    pub created_at: DateTime<Utc>,
}

impl TaskPlan {
    /// The step currently being worked on.
    pub fn current_step(&self) -> Option<&TaskPlanStep> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
    }

    /// The first step that has not started yet.
    pub fn next_pending(&self) -> Option<&TaskPlanStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Pending)
    }

    /// Mark the in-progress step done and start the next pending one.
    /// Returns `false` once every step is done.
    pub fn advance(&mut self) -> bool {
        let Some(current) = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::InProgress)
        else {
            return false;
        };
        self.steps[current].status = StepStatus::Done;
        if let Some(next) = self
            .steps
            .iter_mut()
            .find(|s| s.status == StepStatus::Pending)
        {
            next.status = StepStatus::InProgress;
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    /// Render the plan as a prompt section.
    pub fn render(&self) -> String {
        let mut out = format!("## Current Plan\nGoal: {}\n", self.goal);
        for (i, step) in self.steps.iter().enumerate() {
            let marker = match step.status {
                StepStatus::Done => "[x]",
                StepStatus::InProgress => "[>]",
                StepStatus::Pending => "[ ]",
            };
            out.push_str(&format!("{}. {} {}\n", i + 1, marker, step.title));
        }
        out
    }
}

/// Rolling summary of what a run has changed, decided and left open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingSummary {
    pub changes: Vec<String>,
    pub decisions: Vec<String>,
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

/// Additions to merge into a [`WorkingSummary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPatch {
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}
