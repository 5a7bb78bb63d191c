//! Session store trait: durable history between runs.
//!
//! A session is identified by a caller-chosen id. The runtime loads the
//! record before a run and saves the updated history after it; at most one
//! run per session touches the store at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::Message;

/// Persisted state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            metadata: serde_json::Map::new(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; `None` if it has never been saved.
    async fn load(&self, session_id: &str) -> std::result::Result<Option<SessionRecord>, SessionError>;

    /// Create or replace a session record.
    async fn save(&self, record: SessionRecord) -> std::result::Result<(), SessionError>;

    /// Remove a session. Returns whether it existed.
    async fn delete(&self, session_id: &str) -> std::result::Result<bool, SessionError>;

    async fn list(&self) -> std::result::Result<Vec<String>, SessionError>;
}
