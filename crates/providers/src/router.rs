//! Model router: picks a model for a task from the known-model table.
//!
//! Selection is a pure function of the task and the table: filter by
//! context window (with a safety margin) and capabilities, then rank by
//! the requested priority. Ties always break on model id so the same task
//! yields the same model every time.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use steerclaw_config::RouterConfig;
use steerclaw_core::error::RoutingError;

use crate::models::{ModelProfile, default_models};

/// What the caller cares about most.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPriority {
    /// Prefer zero-cost local models
    #[default]
    Local,
    /// Cheapest estimated cost
    Cost,
    /// Most capable regardless of cost
    Quality,
}

impl std::fmt::Display for RoutingPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Cost => "cost",
            Self::Quality => "quality",
        })
    }
}

impl std::str::FromStr for RoutingPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cost" => Ok(Self::Cost),
            "quality" => Ok(Self::Quality),
            other => Err(format!("unknown priority '{other}' (expected local, cost or quality)")),
        }
    }
}

/// The shape of a request to route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTask {
    pub estimated_input_tokens: usize,
    pub estimated_output_tokens: usize,
    #[serde(default)]
    pub needs_tools: bool,
    #[serde(default)]
    pub needs_vision: bool,
    #[serde(default)]
    pub priority: RoutingPriority,
}

/// The router's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model_id: String,
    pub reason: String,
    /// USD for the estimated input and output tokens
    pub estimated_cost: f64,
    pub context_window: usize,
}

pub struct ModelRouter {
    models: Vec<ModelProfile>,
    safety_margin_ratio: f64,
}

impl ModelRouter {
    pub fn new(models: Vec<ModelProfile>, safety_margin_ratio: f64) -> Self {
        Self {
            models,
            safety_margin_ratio: safety_margin_ratio.max(0.0),
        }
    }

    /// Router over the built-in table with a 10% safety margin.
    pub fn with_defaults() -> Self {
        Self::new(default_models(), 0.1)
    }

    /// Build from `[router]` config; an empty model list means the built-in table.
    pub fn from_config(config: &RouterConfig) -> Self {
        let models = if config.models.is_empty() {
            default_models()
        } else {
            config.models.iter().map(ModelProfile::from).collect()
        };
        Self::new(models, config.safety_margin_ratio)
    }

    pub fn models(&self) -> &[ModelProfile] {
        &self.models
    }

    /// Look up a model's context window, tolerating a missing provider prefix.
    pub fn context_window(&self, model_id: &str) -> Option<usize> {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .or_else(|| self.models.iter().find(|m| m.matches(model_id)))
            .map(|m| m.context_window)
    }

    /// Tokens a model's window must hold for this task, margin included.
    pub fn required_tokens(&self, task: &ModelTask) -> usize {
        let raw = task
            .estimated_input_tokens
            .saturating_add(task.estimated_output_tokens);
        (raw as f64 * (1.0 + self.safety_margin_ratio)).ceil() as usize
    }

    /// Pick the best model for `task`.
    pub fn select_model(&self, task: &ModelTask) -> Result<ModelSelection, RoutingError> {
        if self.models.is_empty() {
            return Err(RoutingError::EmptyTable);
        }

        let required = self.required_tokens(task);
        let cost_of = |m: &ModelProfile| {
            m.pricing
                .cost(task.estimated_input_tokens, task.estimated_output_tokens)
        };

        let mut candidates: Vec<(&ModelProfile, f64)> = self
            .models
            .iter()
            .filter(|m| m.context_window >= required)
            .filter(|m| !task.needs_tools || m.supports_tools)
            .filter(|m| !task.needs_vision || m.supports_vision)
            .map(|m| (m, cost_of(m)))
            .collect();

        candidates.sort_by(|(a, ca), (b, cb)| rank(task.priority, a, *ca, b, *cb));

        let Some((best, cost)) = candidates.first() else {
            tracing::debug!(
                required_tokens = required,
                needs_tools = task.needs_tools,
                needs_vision = task.needs_vision,
                "No model satisfies routing constraints"
            );
            return Err(RoutingError::NoSuitableModel {
                required_tokens: required,
                needs_tools: task.needs_tools,
                needs_vision: task.needs_vision,
            });
        };

        let reason = match task.priority {
            RoutingPriority::Local if best.local => format!(
                "local model with {} token window covers {} required tokens",
                best.context_window, required
            ),
            RoutingPriority::Local => format!(
                "no local model fits {required} tokens; cheapest remote candidate"
            ),
            RoutingPriority::Cost => format!(
                "lowest estimated cost (${cost:.6}) among {} candidates",
                candidates.len()
            ),
            RoutingPriority::Quality => format!(
                "highest quality ({}/10) among {} candidates",
                best.quality,
                candidates.len()
            ),
        };

        tracing::debug!(
            model = %best.id,
            priority = %task.priority,
            required_tokens = required,
            candidates = candidates.len(),
            "Model selected"
        );

        Ok(ModelSelection {
            model_id: best.id.clone(),
            reason,
            estimated_cost: *cost,
            context_window: best.context_window,
        })
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn rank(priority: RoutingPriority, a: &ModelProfile, ca: f64, b: &ModelProfile, cb: f64) -> Ordering {
    let by_cost = ca.total_cmp(&cb);
    let by_local = b.local.cmp(&a.local);
    let by_quality = b.quality.cmp(&a.quality);
    let ordering = match priority {
        RoutingPriority::Local => by_local.then(by_cost).then(by_quality),
        RoutingPriority::Cost => by_cost.then(by_local).then(by_quality),
        RoutingPriority::Quality => by_quality.then(by_cost),
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}
