//! Memory trait: recall of facts and summaries across sessions.
//!
//! The agent loop uses memory in two places: before the first turn it
//! searches for entries relevant to the prompt and folds them into the
//! system prompt, and after a completed run it may save a short summary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A single memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    /// The content of the memory
    pub content: String,

    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Session or run the memory came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub created_at: DateTime<Utc>,

    pub last_accessed: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    /// A fresh entry with a generated id.
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4().simple()),
            content: content.into(),
            tags: Vec::new(),
            source: None,
            created_at: now,
            last_accessed: now,
            score: 0.0,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A query for searching memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,

    /// Only return entries carrying all of these tags
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_limit() -> usize {
    5
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: default_limit(),
            min_score: 0.0,
            tags: Vec::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Storage and search for memories.
///
/// `steerclaw-memory` provides an in-process implementation.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Store a new memory entry, returning its id.
    async fn store(&self, entry: MemoryEntry) -> std::result::Result<String, MemoryError>;

    /// Search memories, best match first.
    async fn search(&self, query: MemoryQuery) -> std::result::Result<Vec<MemoryEntry>, MemoryError>;

    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<MemoryEntry>, MemoryError>;

    async fn count(&self) -> std::result::Result<usize, MemoryError>;

    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}
