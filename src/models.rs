//! Core data models used throughout SOP Harness.
//!
//! These types represent the documents, chunks, index status, and search
//! results that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A document discovered and extracted by the corpus scanner.
///
/// Not persisted on its own: once indexed it only exists as chunks in
/// the vector store.
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    /// Path relative to the corpus root, with `/` separators.
    pub relative_path: String,
    /// Top-level folder name under the corpus root.
    pub category: String,
    /// File stem, used as the document's display name.
    pub name: String,
    pub modified_at: DateTime<Utc>,
    /// Size of the source file on disk.
    pub size_bytes: u64,
    /// Extracted plain text.
    pub text: String,
}

/// A file the scanner recognised but could not turn into text.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub path: String,
    pub category: String,
    pub reason: String,
}

/// A chunk of a document's text, ready to embed.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id: UUID v5 of `relative_path#ordinal`.
    pub id: String,
    pub ordinal: usize,
    pub text: String,
    /// Character offsets into the normalized document text.
    pub char_start: usize,
    pub char_end: usize,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// Lifecycle of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Uninitialized,
    Building,
    Ready,
    Failed,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Document and chunk counts for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Outcome of the last successful build (or adoption of a persisted index).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub categories: BTreeMap<String, CategoryStats>,
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    pub skipped: Vec<SkippedDocument>,
    /// True when the scan yielded no documents at all.
    pub empty_corpus: bool,
    /// True when a persisted collection was reused instead of rebuilt.
    pub reused_existing: bool,
}

/// Point-in-time view of the index, safe to read from any state.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub state: IndexState,
    /// Number of builds started since the process began.
    pub generation: u64,
    pub last_error: Option<String>,
    pub report: Option<BuildReport>,
    pub build_started_at: Option<DateTime<Utc>>,
    pub build_finished_at: Option<DateTime<Utc>>,
}

impl IndexStats {
    pub(crate) fn new() -> Self {
        Self {
            state: IndexState::Uninitialized,
            generation: 0,
            last_error: None,
            report: None,
            build_started_at: None,
            build_finished_at: None,
        }
    }
}

/// A ranked chunk returned by [`Retriever::search`](crate::retriever::Retriever::search).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// 1-based rank position.
    pub rank: usize,
    pub chunk_id: String,
    pub content: String,
    pub category: String,
    pub document_name: String,
    pub source_path: String,
    pub ordinal: usize,
    /// Cosine similarity; higher is more relevant.
    pub similarity: f32,
}

/// One document within a category, as listed by `get_by_category`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub category: String,
    pub source_path: String,
    pub chunks: usize,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}
