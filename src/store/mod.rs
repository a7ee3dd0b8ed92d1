//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the indexer and retriever need
//! from a persistence backend: upsert embedded chunks, nearest-neighbour
//! query with an optional category filter, and bulk clear. Two backends
//! ship with the crate:
//!
//! - [`memory::InMemoryStore`]: `RwLock<HashMap>`; tests and embedding in other programs.
//! - [`sqlite::SqliteVectorStore`]: persistent, one SQLite file.
//!
//! Both score with brute-force cosine similarity and order results through
//! [`rank_matches`], so they return identical rankings for identical data.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::models::DocumentSummary;

/// One embedded chunk as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub category: String,
    /// Path relative to the corpus root.
    pub source_path: String,
    pub document_name: String,
    pub ordinal: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub hash: String,
    pub modified_at: DateTime<Utc>,
    /// Size of the source file, repeated on every chunk of it.
    pub size_bytes: u64,
}

/// A stored chunk scored against a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub id: String,
    pub text: String,
    pub category: String,
    pub source_path: String,
    pub document_name: String,
    pub ordinal: usize,
    pub similarity: f32,
}

impl ChunkMatch {
    pub(crate) fn scored(record: &ChunkRecord, similarity: f32) -> Self {
        Self {
            id: record.id.clone(),
            text: record.text.clone(),
            category: record.category.clone(),
            source_path: record.source_path.clone(),
            document_name: record.document_name.clone(),
            ordinal: record.ordinal,
            similarity,
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()>;

    /// Up to `top_k` records most similar to `vector`, best first.
    ///
    /// `category` is an exact-match filter. Matches below `min_similarity`
    /// are dropped.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<ChunkMatch>>;

    /// Remove every record and the recorded fingerprint.
    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// One summary per stored document, sorted by category then name.
    async fn documents(&self, category: Option<&str>) -> Result<Vec<DocumentSummary>>;

    /// Opaque description of how the stored records were built (model,
    /// chunking, corpus root), if recorded.
    async fn fingerprint(&self) -> Result<Option<String>>;

    async fn set_fingerprint(&self, fingerprint: &str) -> Result<()>;

    /// Human-readable location, for status output.
    fn location(&self) -> String;
}

/// Order by similarity (desc), then ordinal (asc), then id; keep `top_k`.
pub fn rank_matches(mut matches: Vec<ChunkMatch>, top_k: usize) -> Vec<ChunkMatch> {
    matches.sort_by(compare_matches);
    matches.truncate(top_k);
    matches
}

fn compare_matches(a: &ChunkMatch, b: &ChunkMatch) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
        .then_with(|| a.id.cmp(&b.id))
}

/// Group records into per-document summaries.
pub(crate) fn summarize<'a>(
    records: impl Iterator<Item = &'a ChunkRecord>,
) -> Vec<DocumentSummary> {
    let mut by_path: std::collections::BTreeMap<&str, DocumentSummary> =
        std::collections::BTreeMap::new();
    for r in records {
        let entry = by_path
            .entry(r.source_path.as_str())
            .or_insert_with(|| DocumentSummary {
                name: r.document_name.clone(),
                category: r.category.clone(),
                source_path: r.source_path.clone(),
                chunks: 0,
                size_bytes: r.size_bytes,
                modified_at: r.modified_at,
            });
        entry.chunks += 1;
    }
    let mut docs: Vec<DocumentSummary> = by_path.into_values().collect();
    docs.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.source_path.cmp(&b.source_path))
    });
    docs
}
