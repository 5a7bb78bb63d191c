//! Error types for the SteerClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Propagation policy: [`ToolError`]s are absorbed by the agent loop and fed
//! back to the model; [`ProviderError`]s and [`RoutingError`]s propagate to the
//! caller.

use thiserror::Error;

/// The top-level error type for all SteerClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Model routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Session store errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Run lifecycle ---
    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Run timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Approval denied for {tool_name}: {reason}")]
    ApprovalDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error(
        "no suitable model for {required_tokens} tokens (tools: {needs_tools}, vision: {needs_vision})"
    )]
    NoSuitableModel {
        required_tokens: usize,
        needs_tools: bool,
        needs_vision: bool,
    },

    #[error("model table is empty")]
    EmptyTable,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage failed for {session_id}: {reason}")]
    Storage { session_id: String, reason: String },

    #[error("Session record for {0} is corrupt")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn approval_error_displays_correctly() {
        let err = Error::Tool(ToolError::ApprovalDenied {
            tool_name: "shell".into(),
            reason: "operator declined".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("operator declined"));
    }

    #[test]
    fn routing_error_mentions_no_suitable_model() {
        let err = RoutingError::NoSuitableModel {
            required_tokens: 1_000_000,
            needs_tools: false,
            needs_vision: false,
        };
        assert!(err.to_string().starts_with("no suitable model"));
        assert!(err.to_string().contains("1000000"));
    }
}
