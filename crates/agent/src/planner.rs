//! Task planning: decides when a prompt deserves an explicit plan and
//! keeps the run's working summary.
//!
//! A plan is triggered either by size (prompt plus system prompt filling a
//! large share of the usable context) or by wording (complexity keywords
//! such as "refactor" or "step-by-step").

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use steerclaw_config::PlannerConfig;
use steerclaw_core::agent::AgentConfig;
use steerclaw_core::plan::{StepStatus, SummaryPatch, TaskPlan, TaskPlanStep, WorkingSummary};

use crate::context::token::estimate_tokens;

/// Built-in complexity lexicon. Multi-word entries match as phrases.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "multi",
    "multiple",
    "plan",
    "refactor",
    "migrate",
    "migration",
    "steps",
    "step-by-step",
    "breakdown",
    "break down",
    "implement",
    "architecture",
    "redesign",
    "overhaul",
    "roadmap",
    "phases",
];

/// Working summary lists keep at most this many entries.
pub const SUMMARY_LIST_CAP: usize = 10;

const FALLBACK_STEPS: [&str; 4] = [
    "Clarify scope and constraints",
    "Locate relevant code and context",
    "Make the change",
    "Validate the result",
];

static STEP_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").ok());

/// Why a plan was (or was not) created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    PromptLength,
    ComplexityKeywords,
    NotNeeded,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptLength => "prompt_length",
            Self::ComplexityKeywords => "complexity_keywords",
            Self::NotNeeded => "not_needed",
        }
    }
}

impl std::fmt::Display for PlanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub should_plan: bool,
    pub reason: PlanReason,
    pub prompt_tokens: usize,
    pub system_tokens: usize,
    pub threshold_tokens: usize,
    /// Keywords that matched, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
}

pub struct TaskPlanner {
    config: PlannerConfig,
    usable_tokens: usize,
    keywords: Vec<String>,
}

impl TaskPlanner {
    pub fn new(agent: &AgentConfig, config: PlannerConfig) -> Self {
        let mut keywords: Vec<String> = COMPLEXITY_KEYWORDS.iter().map(|k| k.to_string()).collect();
        for extra in &config.extra_keywords {
            let extra = extra.trim().to_lowercase();
            if !extra.is_empty() && !keywords.contains(&extra) {
                keywords.push(extra);
            }
        }
        Self {
            usable_tokens: agent.usable_context_tokens(),
            config,
            keywords,
        }
    }

    pub fn threshold_tokens(&self) -> usize {
        (self.usable_tokens as f64 * self.config.threshold_ratio) as usize
    }

    pub fn should_plan(&self, prompt: &str, system_prompt: &str) -> PlanDecision {
        let prompt_tokens = estimate_tokens(prompt);
        let system_tokens = estimate_tokens(system_prompt);
        let threshold_tokens = self.threshold_tokens();

        let decide = |should_plan, reason, matched_keywords| PlanDecision {
            should_plan,
            reason,
            prompt_tokens,
            system_tokens,
            threshold_tokens,
            matched_keywords,
        };

        if !self.config.enabled {
            return decide(false, PlanReason::NotNeeded, Vec::new());
        }
        if prompt_tokens + system_tokens > threshold_tokens {
            return decide(true, PlanReason::PromptLength, Vec::new());
        }

        let matched = self.matched_keywords(prompt);
        if matched.is_empty() {
            decide(false, PlanReason::NotNeeded, matched)
        } else {
            decide(true, PlanReason::ComplexityKeywords, matched)
        }
    }

    fn matched_keywords(&self, prompt: &str) -> Vec<String> {
        let lower = prompt.to_lowercase();
        let words: HashSet<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();
        self.keywords
            .iter()
            .filter(|k| {
                if k.contains(' ') {
                    lower.contains(k.as_str())
                } else {
                    words.contains(k.as_str())
                }
            })
            .cloned()
            .collect()
    }

    /// Build a plan from the bullet or numbered lines of `prompt`.
    pub fn create_plan(&self, prompt: &str) -> TaskPlan {
        let mut titles: Vec<String> = match STEP_LINE.as_ref() {
            Some(re) => prompt
                .lines()
                .filter_map(|line| re.captures(line))
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                .filter(|t| !t.is_empty())
                .collect(),
            None => Vec::new(),
        };
        if titles.is_empty() {
            titles = FALLBACK_STEPS.iter().map(|s| s.to_string()).collect();
        }
        titles.truncate(self.config.max_steps.max(1));

        let steps = titles
            .into_iter()
            .enumerate()
            .map(|(i, title)| TaskPlanStep {
                id: format!("step-{}", i + 1),
                title,
                status: if i == 0 {
                    StepStatus::InProgress
                } else {
                    StepStatus::Pending
                },
            })
            .collect();

        TaskPlan {
            goal: plan_goal(prompt),
            steps,
            created_at: Utc::now(),
        }
    }

    /// Merge `patch` into `summary` and point `next_step` at the plan's
    /// current step when a plan is given.
    pub fn update_working_summary(
        &self,
        summary: &mut WorkingSummary,
        patch: SummaryPatch,
        plan: Option<&TaskPlan>,
    ) {
        merge_capped(&mut summary.changes, patch.changes);
        merge_capped(&mut summary.decisions, patch.decisions);
        merge_capped(&mut summary.open_questions, patch.open_questions);

        let from_plan = plan.and_then(|p| p.current_step().or_else(|| p.next_pending()));
        summary.next_step = match (patch.next_step, from_plan) {
            (Some(explicit), _) if !explicit.trim().is_empty() => Some(explicit),
            (_, Some(step)) => Some(step.title.clone()),
            (_, None) if plan.is_some() => None,
            (_, None) => summary.next_step.take(),
        };
    }
}

/// Append new entries, skipping blanks and case-insensitive duplicates,
/// then keep only the newest [`SUMMARY_LIST_CAP`].
fn merge_capped(list: &mut Vec<String>, additions: Vec<String>) {
    for item in additions {
        let item = item.trim().to_string();
        if item.is_empty() {
            continue;
        }
        let key = item.to_lowercase();
        list.retain(|existing| existing.to_lowercase() != key);
        list.push(item);
    }
    if list.len() > SUMMARY_LIST_CAP {
        let excess = list.len() - SUMMARY_LIST_CAP;
        list.drain(..excess);
    }
}

fn plan_goal(prompt: &str) -> String {
    let is_step = |line: &str| {
        STEP_LINE
            .as_ref()
            .is_some_and(|re| re.is_match(line))
    };
    let goal = prompt
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_step(line))
        .unwrap_or("Complete the request");
    let mut goal: String = goal.chars().take(160).collect();
    if goal.ends_with(':') {
        goal.pop();
    }
    goal
}
