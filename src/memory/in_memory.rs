//! A process-local `Memory` backend, grounded on the teacher's
//! `InMemoryStore` (HashMap-backed, thread-safe) but stripped of its
//! embedding/chunking pipeline: relevance here is a plain keyword-overlap
//! score rather than cosine similarity over embeddings.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::traits::{Memory, MemoryCategory, MemoryEntry};

fn keyword_score(query: &str, content: &str) -> f32 {
    let query_terms: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let hits = query_terms.iter().filter(|t| content_lower.contains(t.as_str())).count();
    hits as f32 / query_terms.len() as f32
}

fn daily_key(date: &str) -> String {
    format!("daily:{date}")
}

pub struct InMemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Memory for InMemoryStore {
    async fn store(&self, key: &str, content: &str, category: MemoryCategory) -> Result<(), String> {
        let now = Utc::now().to_rfc3339();
        let mut entries = self.entries.lock().map_err(|_| "memory store lock poisoned".to_string())?;
        let created_at = entries.get(key).map(|e| e.created_at.clone()).unwrap_or_else(|| now.clone());
        entries.insert(
            key.to_string(),
            MemoryEntry {
                id: Uuid::new_v4().to_string(),
                key: key.to_string(),
                content: content.to_string(),
                category,
                score: 1.0,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.lock().map_err(|_| "memory store lock poisoned".to_string())?;
        let mut scored: Vec<MemoryEntry> = entries
            .values()
            .map(|e| {
                let mut scored = e.clone();
                scored.score = keyword_score(query, &e.content);
                scored
            })
            .filter(|e| e.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn forget(&self, key: &str) -> Result<bool, String> {
        let mut entries = self.entries.lock().map_err(|_| "memory store lock poisoned".to_string())?;
        Ok(entries.remove(key).is_some())
    }

    async fn store_daily(&self, content: &str) -> Result<(), String> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let key = daily_key(&date);
        let existing = {
            let entries = self.entries.lock().map_err(|_| "memory store lock poisoned".to_string())?;
            entries.get(&key).map(|e| e.content.clone())
        };
        let merged = match existing {
            Some(prior) => format!("{prior}\n{content}"),
            None => content.to_string(),
        };
        self.store(&key, &merged, MemoryCategory::Daily).await
    }

    async fn recall_daily(&self, date: &str) -> Result<Option<String>, String> {
        let entries = self.entries.lock().map_err(|_| "memory store lock poisoned".to_string())?;
        Ok(entries.get(&daily_key(date)).map(|e| e.content.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_recall_by_keyword() {
        let store = InMemoryStore::new();
        store.store("user:name", "The user's name is Dana", MemoryCategory::Core).await.unwrap();
        let results = store.recall("Dana", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "user:name");
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let store = InMemoryStore::new();
        store.store("k", "v", MemoryCategory::Core).await.unwrap();
        assert!(store.forget("k").await.unwrap());
        assert!(!store.forget("k").await.unwrap());
    }

    #[tokio::test]
    async fn daily_entries_accumulate_for_the_same_day() {
        let store = InMemoryStore::new();
        store.store_daily("woke up").await.unwrap();
        store.store_daily("shipped a feature").await.unwrap();
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let diary = store.recall_daily(&date).await.unwrap().unwrap();
        assert!(diary.contains("woke up"));
        assert!(diary.contains("shipped a feature"));
    }

    #[tokio::test]
    async fn recall_daily_missing_date_is_none() {
        let store = InMemoryStore::new();
        assert!(store.recall_daily("2000-01-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_a_harmless_no_op() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
    }
}
