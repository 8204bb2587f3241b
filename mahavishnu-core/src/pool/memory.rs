//! Per-pool memory handle. Opaque to the rest of the core beyond this
//! narrow capability set — the actual vector index (a RAG adapter's
//! internals) lives elsewhere.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub score: f64,
    pub artifact_id: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait MemoryHandle: Send + Sync {
    async fn put(&self, key: String, value: Vec<u8>);
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn search(&self, query: &str, k: usize) -> Vec<SearchCandidate>;
}

/// In-memory handle with a naive substring-overlap scorer. Good enough to
/// exercise the aggregator's fan-out/merge logic; a real vector index is
/// explicitly out of scope.
#[derive(Default)]
pub struct InMemoryMemoryHandle {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryMemoryHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryHandle for InMemoryMemoryHandle {
    async fn put(&self, key: String, value: Vec<u8>) {
        self.entries.write().unwrap().insert(key, value);
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().unwrap().get(key).cloned()
    }

    async fn search(&self, query: &str, k: usize) -> Vec<SearchCandidate> {
        let entries = self.entries.read().unwrap();
        let query = query.to_lowercase();
        let mut scored: Vec<SearchCandidate> = entries
            .iter()
            .filter_map(|(key, value)| {
                let text = String::from_utf8_lossy(value).to_lowercase();
                let hits = text.matches(&query).count() + key.to_lowercase().matches(&query).count();
                if hits == 0 {
                    None
                } else {
                    Some(SearchCandidate {
                        score: hits as f64,
                        artifact_id: key.clone(),
                        metadata: serde_json::json!({ "len": value.len() }),
                    })
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[tokio::test]
    async fn put_then_search_finds_match() {
        let handle = InMemoryMemoryHandle::new();
        handle.put("a".into(), b"contains rust orchestration notes".to_vec()).await;
        handle.put("b".into(), b"unrelated".to_vec()).await;
        let results = handle.search("rust", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artifact_id, "a");
    }
}
