//! Configuration loading, validation, and management for SteerClaw.
//!
//! Loads configuration from `~/.steerclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use steerclaw_core::AgentConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.steerclaw/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-run agent settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context compaction
    #[serde(default)]
    pub context: ContextConfig,

    /// Task planning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Model routing
    #[serde(default)]
    pub router: RouterConfig,

    /// Mid-run steering
    #[serde(default)]
    pub steering: SteeringConfig,

    /// Tool approval policy
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Cross-session memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Directory tools treat as their workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// How the context manager shrinks an over-budget history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Drop the oldest middle messages outright
    DropOldest,
    /// Fold the whole middle span into one summary message
    Summarize,
    /// Drop oldest first, folding whatever was dropped into a summary
    #[default]
    Hybrid,
}

impl CompressionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop_oldest",
            Self::Summarize => "summarize",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub strategy: CompressionStrategy,

    /// Always keep the first and the newest message
    #[serde(default = "default_true")]
    pub keep_first_last: bool,

    /// Upper bound on the synthetic summary message
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
}

fn default_summary_max_tokens() -> usize {
    200
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            strategy: CompressionStrategy::default(),
            keep_first_last: true,
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fraction of the usable context a prompt must fill to trigger a plan
    #[serde(default = "default_threshold_ratio")]
    pub threshold_ratio: f64,

    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Added to the built-in complexity keyword list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_keywords: Vec<String>,
}

fn default_threshold_ratio() -> f64 {
    0.55
}
fn default_max_steps() -> usize {
    6
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: default_threshold_ratio(),
            max_steps: default_max_steps(),
            extra_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Headroom required on top of the estimated tokens
    #[serde(default = "default_safety_margin")]
    pub safety_margin_ratio: f64,

    /// Model table; empty means the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelProfileConfig>,
}

fn default_safety_margin() -> f64 {
    0.1
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            safety_margin_ratio: default_safety_margin(),
            models: Vec::new(),
        }
    }
}

/// One row of the model table, as written in `[[router.models]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfileConfig {
    pub id: String,
    pub provider: String,
    pub context_window: usize,
    #[serde(default = "default_max_output")]
    pub max_output: usize,
    #[serde(default = "default_true")]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub local: bool,
    /// USD per million input tokens
    #[serde(default)]
    pub input_per_m: f64,
    /// USD per million output tokens
    #[serde(default)]
    pub output_per_m: f64,
    /// Relative quality, 1 (worst) to 10 (best)
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_max_output() -> usize {
    4096
}
fn default_quality() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// How long processed messages linger before being purged
    #[serde(default = "default_processed_grace_ms")]
    pub processed_grace_ms: u64,
}

fn default_processed_grace_ms() -> u64 {
    30_000
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            processed_grace_ms: default_processed_grace_ms(),
        }
    }
}

/// Who answers approval requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Approve everything
    Auto,
    /// Deny everything
    #[default]
    Deny,
    /// Wait for an external decision, denying on timeout
    Timed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub mode: ApprovalMode,

    #[serde(default = "default_approval_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_approval_timeout_ms() -> u64 {
    60_000
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::default(),
            timeout_ms: default_approval_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entries folded into the system prompt before the first turn
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Save a summary of each completed run
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

fn default_recall_limit() -> usize {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recall_limit: default_recall_limit(),
            auto_save: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location (`~/.steerclaw/config.toml`).
    ///
    /// Falls back to defaults if the file doesn't exist. Environment
    /// variables override file values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STEERCLAW_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("STEERCLAW_MODEL") {
            self.agent.model = model;
        }

        if let Some(raw) = lookup("STEERCLAW_MAX_CONTEXT_TOKENS") {
            self.agent.max_context_tokens = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "STEERCLAW_MAX_CONTEXT_TOKENS must be an integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(dir) = lookup("STEERCLAW_WORKSPACE") {
            self.workspace_root = Some(PathBuf::from(dir));
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".steerclaw")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// The workspace tools run in: configured, or `~/.steerclaw/workspace`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;
        if !(0.0..=2.0).contains(&agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if agent.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns must be at least 1".into(),
            ));
        }
        if agent.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent.timeout_ms must be > 0".into(),
            ));
        }
        if agent.reserved_tokens >= agent.max_context_tokens {
            return Err(ConfigError::ValidationError(format!(
                "agent.reserved_tokens ({}) must be smaller than agent.max_context_tokens ({})",
                agent.reserved_tokens, agent.max_context_tokens
            )));
        }

        if self.context.summary_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.summary_max_tokens must be > 0".into(),
            ));
        }

        if !(self.planner.threshold_ratio > 0.0 && self.planner.threshold_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "planner.threshold_ratio must be in (0.0, 1.0]".into(),
            ));
        }
        if self.planner.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "planner.max_steps must be at least 1".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.router.safety_margin_ratio) {
            return Err(ConfigError::ValidationError(
                "router.safety_margin_ratio must be in [0.0, 1.0)".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.router.models {
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "router.models: duplicate id '{}'",
                    model.id
                )));
            }
            if model.context_window == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "router.models: '{}' has a zero context_window",
                    model.id
                )));
            }
            if !(1..=10).contains(&model.quality) {
                return Err(ConfigError::ValidationError(format!(
                    "router.models: '{}' quality must be 1-10",
                    model.id
                )));
            }
            if model.input_per_m < 0.0 || model.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "router.models: '{}' has a negative price",
                    model.id
                )));
            }
        }

        if self.approval.mode == ApprovalMode::Timed && self.approval.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "approval.timeout_ms must be > 0 in timed mode".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
