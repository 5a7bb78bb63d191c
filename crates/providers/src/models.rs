//! Known-model table.
//!
//! Prices are in USD per 1 million tokens. Local models cost nothing.
//! A table can also be loaded from `[[router.models]]` in the config file.

use serde::{Deserialize, Serialize};
use steerclaw_config::ModelProfileConfig;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub const FREE: Self = Self::new(0.0, 0.0);

    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Everything the router knows about one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    pub provider: String,
    pub context_window: usize,
    pub max_output: usize,
    pub supports_tools: bool,
    pub supports_vision: bool,
    /// Runs on this machine (e.g. via Ollama)
    pub local: bool,
    pub pricing: ModelPricing,
    /// Relative quality, 1 (worst) to 10 (best)
    pub quality: u8,
}

impl ModelProfile {
    fn cloud(
        id: &str,
        provider: &str,
        context_window: usize,
        pricing: ModelPricing,
        quality: u8,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            context_window,
            max_output: 8192,
            supports_tools: true,
            supports_vision: false,
            local: false,
            pricing,
            quality,
        }
    }

    fn local(id: &str, context_window: usize, quality: u8) -> Self {
        Self {
            id: id.into(),
            provider: "ollama".into(),
            context_window,
            max_output: 4096,
            supports_tools: true,
            supports_vision: false,
            local: true,
            pricing: ModelPricing::FREE,
            quality,
        }
    }

    fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    /// Whether `model_id` names this model, with or without the provider prefix.
    pub fn matches(&self, model_id: &str) -> bool {
        if self.id == model_id {
            return true;
        }
        let bare = |s: &str| s.split_once('/').map(|(_, rest)| rest).unwrap_or(s).to_string();
        bare(&self.id) == bare(model_id)
    }
}

impl From<&ModelProfileConfig> for ModelProfile {
    fn from(cfg: &ModelProfileConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            provider: cfg.provider.clone(),
            context_window: cfg.context_window,
            max_output: cfg.max_output,
            supports_tools: cfg.supports_tools,
            supports_vision: cfg.supports_vision,
            local: cfg.local,
            pricing: if cfg.local {
                ModelPricing::FREE
            } else {
                ModelPricing::new(cfg.input_per_m, cfg.output_per_m)
            },
            quality: cfg.quality,
        }
    }
}

/// The built-in model table.
pub fn default_models() -> Vec<ModelProfile> {
    vec![
        // ── Local (Ollama) ─────────────────────────────────────────
        ModelProfile::local("ollama/llama3.1:8b", 8_192, 4),
        ModelProfile::local("ollama/qwen2.5-coder:14b", 32_768, 5),
        ModelProfile::local("ollama/llava:13b", 4_096, 3)
            .with_vision()
            .without_tools(),
        // ── OpenAI ─────────────────────────────────────────────────
        ModelProfile::cloud("openai/gpt-4o-mini", "openai", 128_000, ModelPricing::new(0.15, 0.6), 6)
            .with_vision(),
        ModelProfile::cloud("openai/gpt-4o", "openai", 128_000, ModelPricing::new(2.5, 10.0), 8)
            .with_vision(),
        // ── Anthropic ──────────────────────────────────────────────
        ModelProfile::cloud(
            "anthropic/claude-3.5-haiku",
            "anthropic",
            200_000,
            ModelPricing::new(0.8, 4.0),
            6,
        ),
        ModelProfile::cloud(
            "anthropic/claude-sonnet-4",
            "anthropic",
            200_000,
            ModelPricing::new(3.0, 15.0),
            9,
        )
        .with_vision(),
        ModelProfile::cloud(
            "anthropic/claude-opus-4",
            "anthropic",
            200_000,
            ModelPricing::new(15.0, 75.0),
            10,
        )
        .with_vision(),
        // ── DeepSeek ───────────────────────────────────────────────
        ModelProfile::cloud("deepseek/deepseek-v3", "deepseek", 64_000, ModelPricing::new(0.27, 1.1), 7),
    ]
}
