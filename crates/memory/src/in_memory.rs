//! In-memory backend: useful for testing and ephemeral sessions.
//!
//! Search is keyword based: the query is split into lowercase terms and an
//! entry scores the fraction of distinct terms it contains.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use steerclaw_core::error::MemoryError;
use steerclaw_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use tokio::sync::RwLock;
use uuid::Uuid;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "you", "your", "what",
    "how", "can", "please",
];

/// Lowercase alphanumeric terms of at least three characters, minus stopwords.
pub fn keyword_terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// An in-memory backend that stores memories in a Vec.
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.content.trim().is_empty() {
            return Err(MemoryError::Storage("refusing to store empty memory".into()));
        }
        if entry.id.is_empty() {
            entry.id = format!("mem_{}", Uuid::new_v4().simple());
        }
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        entries.retain(|e| e.id != id);
        entries.push(entry);
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        let terms = keyword_terms(&query.text);
        if terms.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let mut results: Vec<MemoryEntry> = entries
            .iter_mut()
            .filter(|e| query.tags.iter().all(|t| e.tags.contains(t)))
            .filter_map(|e| {
                let content_terms = keyword_terms(&e.content);
                let hits = terms.iter().filter(|t| content_terms.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                let score = hits as f32 / terms.len() as f32;
                if score < query.min_score {
                    return None;
                }
                e.last_accessed = now;
                let mut hit = e.clone();
                hit.score = score;
                Some(hit)
            })
            .collect();

        // Best score first; newer entries win ties.
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        results.truncate(query.limit);

        tracing::debug!(query = %query.text, hits = results.len(), "Memory search");
        Ok(results)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < len_before)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_retrieve() {
        let mem = InMemoryBackend::new();
        let id = mem
            .store(MemoryEntry::new("Rust is a systems language"))
            .await
            .unwrap();
        let entry = mem.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.content, "Rust is a systems language");
    }

    #[tokio::test]
    async fn search_ranks_by_term_overlap() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("Refactored the session store to use tokio RwLock"))
            .await
            .unwrap();
        mem.store(MemoryEntry::new("Python is great for scripting"))
            .await
            .unwrap();
        mem.store(MemoryEntry::new("The session id format changed"))
            .await
            .unwrap();

        let results = mem
            .search(MemoryQuery::new("How does the session store work?"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("session store"));
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn search_respects_tags_and_limit() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("deploy notes alpha").with_tags(vec!["ops".into()]))
            .await
            .unwrap();
        mem.store(MemoryEntry::new("deploy notes beta"))
            .await
            .unwrap();

        let mut query = MemoryQuery::new("deploy");
        query.tags = vec!["ops".into()];
        let results = mem.search(query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("alpha"));

        let results = mem
            .search(MemoryQuery::new("deploy").with_limit(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn stopword_only_query_matches_nothing() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("the and for")).await.unwrap();
        assert!(mem.search(MemoryQuery::new("the")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let mem = InMemoryBackend::new();
        assert!(mem.store(MemoryEntry::new("   ")).await.is_err());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let mem = InMemoryBackend::new();
        let id = mem.store(MemoryEntry::new("To be deleted")).await.unwrap();
        mem.store(MemoryEntry::new("Entry 2")).await.unwrap();
        assert!(mem.delete(&id).await.unwrap());
        assert!(!mem.delete(&id).await.unwrap());
        assert_eq!(mem.count().await.unwrap(), 1);

        mem.clear().await.unwrap();
        assert_eq!(mem.count().await.unwrap(), 0);
    }
}
