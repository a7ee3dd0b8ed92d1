//! Query-time retrieval over the SOP index.
//!
//! The [`Retriever`] is the single entry point used by the CLI, the HTTP
//! API and the MCP server. Every query goes through
//! [`Indexer::ensure_ready`], so the first request transparently builds the
//! index and later ones never observe a half-built store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;
use crate::error::{IndexError, Result};
use crate::indexer::Indexer;
use crate::models::{BuildReport, DocumentSummary, IndexState, IndexStats, SearchResult};

pub const GUIDANCE_FOUND: &str = "Follow the procedures outlined in the relevant SOP documents above.";
pub const GUIDANCE_NOT_FOUND: &str = "No specific SOP guidance found for this situation.";

/// One evidence fragment in a [`Guidance`] answer.
#[derive(Debug, Clone, Serialize)]
pub struct GuidanceEntry {
    pub rank: usize,
    pub document_name: String,
    pub category: String,
    pub source_path: String,
    pub content: String,
    pub similarity: f32,
}

/// Evidence gathered for a situation, best match first.
#[derive(Debug, Clone, Serialize)]
pub struct Guidance {
    pub situation: String,
    pub category: Option<String>,
    pub guidance_found: bool,
    pub entries: Vec<GuidanceEntry>,
    /// All fragments concatenated in rank order, each tagged with its source.
    pub evidence: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub name: String,
    pub documents: usize,
    pub chunks: usize,
    /// A folder with this name exists under the corpus root.
    pub on_disk: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryListing {
    /// False until the first build has completed.
    pub indexed: bool,
    pub state: IndexState,
    pub categories: Vec<CategoryInfo>,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub state: IndexState,
    pub indexed: bool,
    pub corpus_root: String,
    pub store_location: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub available_categories: Vec<String>,
    pub index: IndexStats,
}

pub struct Retriever {
    indexer: Arc<Indexer>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(indexer: Arc<Indexer>, config: RetrievalConfig) -> Self {
        Self { indexer, config }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn default_max_results(&self) -> usize {
        self.config.default_max_results
    }

    /// Up to `max_results` chunks most similar to `query`, best first.
    ///
    /// `category` restricts results to one category (exact match). An
    /// unknown category or an empty corpus gives an empty vector.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        category: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if max_results == 0 {
            return Err(IndexError::InvalidRequest(
                "max_results must be greater than 0".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(IndexError::InvalidRequest("query must not be empty".to_string()));
        }

        let _ready = self.indexer.ensure_ready().await?;
        let vector = embed_query(self.indexer.embedder().as_ref(), query)
            .await
            .map_err(IndexError::embedding)?;
        let matches = self
            .indexer
            .store()
            .query(&vector, max_results, category, self.config.min_similarity)
            .await
            .map_err(IndexError::store)?;

        debug!(query, ?category, hits = matches.len(), "search complete");

        Ok(matches
            .into_iter()
            .enumerate()
            .map(|(i, m)| SearchResult {
                rank: i + 1,
                chunk_id: m.id,
                content: m.text,
                category: m.category,
                document_name: m.document_name,
                source_path: m.source_path,
                ordinal: m.ordinal,
                similarity: m.similarity,
            })
            .collect())
    }

    /// Gather evidence for what to do in `situation`.
    pub async fn guidance(&self, situation: &str, category: Option<&str>) -> Result<Guidance> {
        let results = self
            .search(situation, self.config.guidance_results, category)
            .await?;

        let evidence = results
            .iter()
            .map(|r| {
                format!(
                    "[{}] {} / {} ({})\n{}",
                    r.rank, r.category, r.document_name, r.source_path, r.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let entries: Vec<GuidanceEntry> = results
            .into_iter()
            .map(|r| GuidanceEntry {
                rank: r.rank,
                document_name: r.document_name,
                category: r.category,
                source_path: r.source_path,
                content: r.content,
                similarity: r.similarity,
            })
            .collect();

        let guidance_found = !entries.is_empty();
        Ok(Guidance {
            situation: situation.to_string(),
            category: category.map(str::to_string),
            guidance_found,
            entries,
            evidence,
            recommendation: if guidance_found {
                GUIDANCE_FOUND
            } else {
                GUIDANCE_NOT_FOUND
            }
            .to_string(),
        })
    }

    /// Indexed and on-disk categories with counts. Never triggers a build.
    pub fn list_categories(&self) -> CategoryListing {
        let stats = self.indexer.stats();
        let on_disk = self.indexer.discovered_categories();
        let report = stats.report.clone().unwrap_or_default();
        let indexed = stats.report.is_some();

        CategoryListing {
            indexed,
            state: stats.state,
            categories: merge_categories(&report, &on_disk),
            total_documents: report.documents_indexed,
            total_chunks: report.chunks_indexed,
            last_error: stats.last_error,
        }
    }

    /// Every indexed document in `category`.
    pub async fn get_by_category(&self, category: &str) -> Result<Vec<DocumentSummary>> {
        let _ready = self.indexer.ensure_ready().await?;
        self.indexer
            .store()
            .documents(Some(category))
            .await
            .map_err(IndexError::store)
    }

    pub async fn refresh(&self) -> Result<BuildReport> {
        self.indexer.refresh().await
    }

    pub fn status(&self) -> ServerStatus {
        let stats = self.indexer.stats();
        let embedder = self.indexer.embedder();
        ServerStatus {
            state: stats.state,
            indexed: stats.state == IndexState::Ready,
            corpus_root: self.indexer.corpus_root().display().to_string(),
            store_location: self.indexer.store().location(),
            embedding_model: embedder.model_name().to_string(),
            embedding_dims: embedder.dims(),
            available_categories: self.indexer.discovered_categories(),
            index: stats,
        }
    }
}

fn merge_categories(report: &BuildReport, on_disk: &[String]) -> Vec<CategoryInfo> {
    let mut merged: BTreeMap<&str, CategoryInfo> = BTreeMap::new();
    for (name, counts) in &report.categories {
        merged.insert(
            name,
            CategoryInfo {
                name: name.clone(),
                documents: counts.documents,
                chunks: counts.chunks,
                on_disk: false,
            },
        );
    }
    for name in on_disk {
        merged
            .entry(name)
            .or_insert_with(|| CategoryInfo {
                name: name.clone(),
                documents: 0,
                chunks: 0,
                on_disk: true,
            })
            .on_disk = true;
    }
    merged.into_values().collect()
}
