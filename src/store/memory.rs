//! In-memory [`VectorStore`] for tests and embedding in other programs.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::DocumentSummary;

use super::{rank_matches, summarize, ChunkMatch, ChunkRecord, VectorStore};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, ChunkRecord>>,
    fingerprint: RwLock<Option<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(poisoned)?;
        for r in records {
            stored.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<ChunkMatch>> {
        let stored = self.records.read().map_err(poisoned)?;
        let matches: Vec<ChunkMatch> = stored
            .values()
            .filter(|r| category.is_none_or(|c| r.category == c))
            .map(|r| ChunkMatch::scored(r, cosine_similarity(vector, &r.vector)))
            .filter(|m| min_similarity.is_none_or(|min| m.similarity >= min))
            .collect();
        Ok(rank_matches(matches, top_k))
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        *self.fingerprint.write().map_err(poisoned)? = None;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    async fn documents(&self, category: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let stored = self.records.read().map_err(poisoned)?;
        Ok(summarize(
            stored
                .values()
                .filter(|r| category.is_none_or(|c| r.category == c)),
        ))
    }

    async fn fingerprint(&self) -> Result<Option<String>> {
        Ok(self.fingerprint.read().map_err(poisoned)?.clone())
    }

    async fn set_fingerprint(&self, fingerprint: &str) -> Result<()> {
        *self.fingerprint.write().map_err(poisoned)? = Some(fingerprint.to_string());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(
        id: &str,
        category: &str,
        path: &str,
        ordinal: usize,
        vector: Vec<f32>,
    ) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            vector,
            text: format!("text of {}", id),
            category: category.to_string(),
            source_path: path.to_string(),
            document_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            ordinal,
            char_start: 0,
            char_end: 10,
            hash: String::new(),
            modified_at: Utc::now(),
            size_bytes: 2048,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        store
            .upsert(&[record("a", "Q", "Q/x.pdf", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&[record("a", "Q", "Q/x.pdf", 0, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 5, None, None).await.unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_filters_category_and_threshold() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("a", "Quality", "Quality/x.pdf", 0, vec![1.0, 0.0]),
                record("b", "Audit", "Audit/y.pdf", 0, vec![1.0, 0.1]),
                record("c", "Quality", "Quality/x.pdf", 1, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 5, Some("Quality"), None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.category == "Quality"));
        assert_eq!(hits[0].id, "a");

        let hits = store.query(&[1.0, 0.0], 5, None, Some(0.5)).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.query(&[1.0, 0.0], 5, Some("Nope"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn documents_grouped_and_clear_resets() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("a", "Quality", "Quality/x.pdf", 0, vec![1.0]),
                record("b", "Quality", "Quality/x.pdf", 1, vec![1.0]),
                record("c", "Audit", "Audit/y.pdf", 0, vec![1.0]),
            ])
            .await
            .unwrap();
        store.set_fingerprint("mock").await.unwrap();

        let docs = store.documents(None).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].category, "Audit");
        assert_eq!(docs[1].chunks, 2);
        assert_eq!(docs[1].size_bytes, 2048);
        assert_eq!(store.documents(Some("Audit")).await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.fingerprint().await.unwrap(), None);
    }
}
