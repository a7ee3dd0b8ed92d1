//! Error taxonomy for the indexing and retrieval core.
//!
//! Per-document extraction problems never reach this type: the scanner
//! absorbs them and records a [`SkippedDocument`](crate::models::SkippedDocument).
//! Everything here is either caller-fixable (`InvalidConfiguration`,
//! `InvalidRequest`) or fatal for the current build or query.

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// Bad chunking or retrieval parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A request argument is out of range (e.g. `max_results == 0`).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// One document could not be turned into text. The scanner records
    /// these as skipped documents; they never fail a build.
    #[error("extraction failed for {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: std::sync::Arc<ExtractError>,
    },

    /// The embedding capability failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector store failed.
    #[error("vector store failed: {0}")]
    VectorStore(String),

    /// The most recent build failed; the index must be refreshed.
    #[error("index build failed: {reason}. Run refresh_sop_database to rebuild the index")]
    BuildFailed { reason: String },
}

impl IndexError {
    pub(crate) fn embedding(err: impl std::fmt::Display) -> Self {
        IndexError::Embedding(format!("{err:#}"))
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        IndexError::VectorStore(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
