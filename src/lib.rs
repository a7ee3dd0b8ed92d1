//! # SOP Harness
//!
//! Category-aware semantic retrieval over a directory of standard operating
//! procedure documents.
//!
//! A corpus is a folder tree where each top-level folder is a category:
//! PDF and Word files underneath are extracted, split into overlapping
//! character windows, embedded and stored in a vector store. Queries are
//! answered with ranked evidence fragments, optionally scoped to one
//! category. The index is built lazily on the first query and rebuilt on
//! demand.
//!
//! ## Architecture
//!
//! ```text
//! sop_documents/<category>/**/*.pdf|docx
//!        │
//!        ▼
//! ┌──────────────┐  ┌──────────┐  ┌────────────────┐  ┌──────────────┐
//! │  scanner +   │─►│  chunk   │─►│   embedding    │─►│ store (sqlite│
//! │  extract     │  │          │  │   provider     │  │  / memory)   │
//! └──────────────┘  └──────────┘  └────────────────┘  └──────┬───────┘
//!        └────────────── indexer (state machine) ────────────┘
//!                                  │
//!                             retriever
//!                                  │
//!                tools ── CLI / HTTP (axum) / MCP stdio (rmcp)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults and validation |
//! | [`extract`] | PDF and Word text extraction |
//! | [`scanner`] | Corpus walk with folder-derived categories |
//! | [`chunk`] | Overlapping fixed-window chunker |
//! | [`embedding`] | Embedding providers (local, OpenAI, Ollama) |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`indexer`] | Lazy build, refresh and index state |
//! | [`retriever`] | Search, guidance, category listing |
//! | [`tools`] | Agent-facing tool definitions |
//! | [`server`] | JSON HTTP API |
//! | [`mcp`] | MCP server over stdio |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod mcp;
pub mod models;
pub mod retriever;
pub mod scanner;
pub mod server;
pub mod store;
pub mod tools;

use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::indexer::{Indexer, IndexerOptions};
use crate::retriever::Retriever;
use crate::store::sqlite::SqliteVectorStore;

/// Wire up the configured embedding provider, the SQLite store, the
/// indexer and the retriever. Does not build the index.
pub async fn open(config: &Config) -> anyhow::Result<Arc<Retriever>> {
    let embedder = embedding::create_provider(&config.embedding)
        .context("Failed to create embedding provider")?;
    let store = SqliteVectorStore::open(&config.db.path).await?;
    let indexer = Indexer::new(
        IndexerOptions::from_config(config),
        embedder,
        Arc::new(store),
    )?;
    Ok(Arc::new(Retriever::new(
        Arc::new(indexer),
        config.retrieval.clone(),
    )))
}
