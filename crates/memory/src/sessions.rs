//! In-memory session store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use steerclaw_core::error::SessionError;
use steerclaw_core::session::{SessionRecord, SessionStore};
use tokio::sync::RwLock;

/// Keeps session records in a map. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, mut record: SessionRecord) -> Result<(), SessionError> {
        if record.session_id.is_empty() {
            return Err(SessionError::Storage {
                session_id: record.session_id,
                reason: "session id must not be empty".into(),
            });
        }
        record.updated_at = Utc::now();
        tracing::debug!(
            session_id = %record.session_id,
            messages = record.messages.len(),
            "Session saved"
        );
        self.sessions
            .write()
            .await
            .insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
