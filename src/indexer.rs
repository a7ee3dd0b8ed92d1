//! Index construction and the index state machine.
//!
//! The [`Indexer`] owns the pipeline scan → chunk → embed → upsert and the
//! [`IndexState`] that tells everyone else whether the vector store can be
//! trusted:
//!
//! ```text
//! Uninitialized ──► Building ──► Ready
//!                      │  ▲        │
//!                      ▼  └────────┘ refresh
//!                    Failed ──► Building (refresh, or a later ensure_ready)
//! ```
//!
//! # Concurrency
//!
//! A fair `tokio::sync::RwLock<()>` gates the store. Builds hold the write
//! half for their whole duration; searches hold the read half (via
//! [`ReadyGuard`]) while they query. Searches therefore run alongside each
//! other but never alongside a build, and a refresh queues behind the build
//! in flight. Status lives behind a separate `std::sync::RwLock` that is
//! only held for a copy, so [`Indexer::stats`] never waits on a build.
//!
//! Scanning and extraction are blocking file work. They run on
//! `spawn_blocking` and stream documents to the async embed/upsert loop
//! through a bounded channel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

use crate::chunk::{make_chunks, validate_params};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::models::{BuildReport, CategoryStats, IndexState, IndexStats, ScannedDocument};
use crate::scanner::{self, ScanOptions};
use crate::store::{ChunkRecord, VectorStore};

/// Documents buffered between the scanner thread and the embed loop.
const SCAN_QUEUE: usize = 8;

/// Everything the indexer needs besides its two capabilities.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub corpus_root: PathBuf,
    pub scan: ScanOptions,
    pub chunking: ChunkingConfig,
    /// Texts per embedding call.
    pub batch_size: usize,
    /// Adopt a non-empty persisted collection on first use.
    pub reuse_existing: bool,
}

impl IndexerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            corpus_root: config.corpus.root.clone(),
            scan: ScanOptions::from(&config.corpus),
            chunking: config.chunking,
            batch_size: config.embedding.batch_size,
            reuse_existing: config.index.reuse_existing,
        }
    }
}

/// Build parameters a persisted collection must share to be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Fingerprint {
    embedding_model: String,
    dims: usize,
    chunk_size: usize,
    overlap: usize,
    corpus_root: String,
}

pub struct Indexer {
    options: IndexerOptions,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    gate: RwLock<()>,
    status: std::sync::RwLock<IndexStats>,
}

/// Proof that the index is `Ready`. Holds the read half of the build gate,
/// so no build can start until it is dropped.
pub struct ReadyGuard<'a> {
    _gate: RwLockReadGuard<'a, ()>,
}

impl Indexer {
    pub fn new(
        options: IndexerOptions,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        validate_params(options.chunking.chunk_size, options.chunking.overlap)?;
        if options.batch_size == 0 {
            return Err(IndexError::InvalidConfiguration(
                "embedding batch_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            options,
            embedder,
            store,
            gate: RwLock::new(()),
            status: std::sync::RwLock::new(IndexStats::new()),
        })
    }

    /// The provider used for the corpus. Queries must use the same one.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn corpus_root(&self) -> &Path {
        &self.options.corpus_root
    }

    /// Category folders currently on disk, whether indexed or not.
    pub fn discovered_categories(&self) -> Vec<String> {
        scanner::list_categories(&self.options.corpus_root)
    }

    /// Snapshot of the index status. Never waits for a build.
    pub fn stats(&self) -> IndexStats {
        match self.status.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn fingerprint(&self) -> Fingerprint {
        let root = &self.options.corpus_root;
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
        Fingerprint {
            embedding_model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
            chunk_size: self.options.chunking.chunk_size,
            overlap: self.options.chunking.overlap,
            corpus_root: root.display().to_string(),
        }
    }

    fn update_status(&self, f: impl FnOnce(&mut IndexStats)) {
        let mut guard = match self.status.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    /// Wait until the index is `Ready`, building it if nobody has.
    ///
    /// Concurrent callers share a single build. If that build fails, the
    /// caller that ran it and every caller that waited on it get
    /// [`IndexError::BuildFailed`]. A call made after the failure was
    /// recorded starts a fresh attempt.
    pub async fn ensure_ready(&self) -> Result<ReadyGuard<'_>> {
        let entry = self.stats();
        // A build already in flight counts as one this caller is waiting on.
        let seen_generation = match entry.state {
            IndexState::Building => entry.generation.saturating_sub(1),
            _ => entry.generation,
        };

        loop {
            let read = self.gate.read().await;
            let snap = self.stats();
            match snap.state {
                IndexState::Ready => return Ok(ReadyGuard { _gate: read }),
                IndexState::Failed if snap.generation > seen_generation => {
                    return Err(failed(&snap));
                }
                _ => {}
            }
            drop(read);

            let write = self.gate.write().await;
            let snap = self.stats();
            match snap.state {
                IndexState::Ready => continue,
                IndexState::Failed if snap.generation > seen_generation => {
                    return Err(failed(&snap));
                }
                _ => {}
            }
            let first_use = snap.state == IndexState::Uninitialized;
            self.build_locked(first_use)
                .await
                .map_err(|e| IndexError::BuildFailed {
                    reason: e.to_string(),
                })?;
            drop(write);
        }
    }

    /// Clear the collection and rebuild from the corpus.
    ///
    /// Waits for any active build or in-flight searches to finish first.
    pub async fn refresh(&self) -> Result<BuildReport> {
        let _write = self.gate.write().await;
        info!(root = %self.options.corpus_root.display(), "refreshing SOP index");
        self.build_locked(false).await
    }

    /// Run one build. The caller must hold the write half of the gate.
    async fn build_locked(&self, allow_reuse: bool) -> Result<BuildReport> {
        let started = std::time::Instant::now();
        self.update_status(|s| {
            s.state = IndexState::Building;
            s.generation += 1;
            s.last_error = None;
            s.build_started_at = Some(Utc::now());
            s.build_finished_at = None;
        });

        let outcome = match self.try_reuse(allow_reuse).await {
            Ok(Some(report)) => Ok(report),
            Ok(None) => self.rebuild().await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(report) => {
                info!(
                    documents = report.documents_indexed,
                    chunks = report.chunks_indexed,
                    skipped = report.skipped.len(),
                    categories = report.categories.len(),
                    reused = report.reused_existing,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "SOP index ready"
                );
                let report = report.clone();
                self.update_status(|s| {
                    s.state = IndexState::Ready;
                    s.report = Some(report);
                    s.build_finished_at = Some(Utc::now());
                });
            }
            Err(e) => {
                error!(error = %e, "SOP index build failed");
                let reason = e.to_string();
                self.update_status(|s| {
                    s.state = IndexState::Failed;
                    s.last_error = Some(reason);
                    s.report = None;
                    s.build_finished_at = Some(Utc::now());
                });
            }
        }

        outcome
    }

    /// Adopt the persisted collection if it is non-empty and its fingerprint
    /// matches the current model, chunking and corpus root.
    async fn try_reuse(&self, allow_reuse: bool) -> Result<Option<BuildReport>> {
        if !allow_reuse || !self.options.reuse_existing {
            return Ok(None);
        }
        let count = self.store.count().await.map_err(IndexError::store)?;
        if count == 0 {
            return Ok(None);
        }
        let stored = self.store.fingerprint().await.map_err(IndexError::store)?;
        let stored: Option<Fingerprint> =
            stored.and_then(|raw| serde_json::from_str(&raw).ok());
        let current = self.fingerprint();
        if stored.as_ref() != Some(&current) {
            info!(
                stored = ?stored,
                current = ?current,
                "persisted index was built with different settings; rebuilding"
            );
            return Ok(None);
        }

        let documents = self.store.documents(None).await.map_err(IndexError::store)?;
        let mut report = BuildReport {
            reused_existing: true,
            ..Default::default()
        };
        for doc in &documents {
            let entry = report.categories.entry(doc.category.clone()).or_default();
            entry.documents += 1;
            entry.chunks += doc.chunks;
            report.chunks_indexed += doc.chunks;
        }
        report.documents_indexed = documents.len();
        info!(
            location = %self.store.location(),
            chunks = count,
            "reusing persisted SOP index"
        );
        Ok(Some(report))
    }

    async fn rebuild(&self) -> Result<BuildReport> {
        self.store.clear().await.map_err(IndexError::store)?;

        let (tx, mut rx) = mpsc::channel::<ScannedDocument>(SCAN_QUEUE);
        let root = self.options.corpus_root.clone();
        let scan_options = self.options.scan.clone();
        let scan_task = tokio::task::spawn_blocking(move || {
            let mut scan = scanner::scan(&root, &scan_options)?;
            for doc in scan.by_ref() {
                // Receiver gone means the build already failed.
                if tx.blocking_send(doc).is_err() {
                    break;
                }
            }
            anyhow::Ok(scan.into_skipped())
        });

        let mut categories: BTreeMap<String, CategoryStats> = BTreeMap::new();
        let mut consumed: Result<()> = Ok(());
        while let Some(doc) = rx.recv().await {
            match self.index_document(&doc).await {
                Ok(chunks) => {
                    let entry = categories.entry(doc.category.clone()).or_default();
                    entry.documents += 1;
                    entry.chunks += chunks;
                }
                Err(e) => {
                    consumed = Err(e);
                    break;
                }
            }
        }
        drop(rx);

        let scanned = scan_task.await.map_err(|e| IndexError::BuildFailed {
            reason: format!("corpus scan aborted: {}", e),
        })?;
        consumed?;
        let skipped = scanned.map_err(|e| IndexError::InvalidConfiguration(format!("{:#}", e)))?;

        let fingerprint = serde_json::to_string(&self.fingerprint())
            .map_err(|e| IndexError::VectorStore(e.to_string()))?;
        self.store
            .set_fingerprint(&fingerprint)
            .await
            .map_err(IndexError::store)?;

        let documents_indexed = categories.values().map(|c| c.documents).sum();
        let chunks_indexed = categories.values().map(|c| c.chunks).sum();
        Ok(BuildReport {
            categories,
            documents_indexed,
            chunks_indexed,
            skipped,
            empty_corpus: documents_indexed == 0,
            reused_existing: false,
        })
    }

    /// Chunk, embed and upsert one document. Returns the chunk count.
    async fn index_document(&self, doc: &ScannedDocument) -> Result<usize> {
        let chunking = self.options.chunking;
        let chunks = make_chunks(
            &doc.relative_path,
            &doc.text,
            chunking.chunk_size,
            chunking.overlap,
        )?;

        for batch in chunks.chunks(self.options.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(IndexError::embedding)?;
            if vectors.len() != texts.len() {
                return Err(IndexError::Embedding(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    vectors.len()
                )));
            }

            let records: Vec<ChunkRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| ChunkRecord {
                    id: chunk.id.clone(),
                    vector,
                    text: chunk.text.clone(),
                    category: doc.category.clone(),
                    source_path: doc.relative_path.clone(),
                    document_name: doc.name.clone(),
                    ordinal: chunk.ordinal,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                    hash: chunk.hash.clone(),
                    modified_at: doc.modified_at,
                    size_bytes: doc.size_bytes,
                })
                .collect();
            self.store.upsert(&records).await.map_err(IndexError::store)?;
        }

        debug!(path = %doc.relative_path, chunks = chunks.len(), "indexed document");
        Ok(chunks.len())
    }
}

fn failed(snap: &IndexStats) -> IndexError {
    IndexError::BuildFailed {
        reason: snap
            .last_error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Toggle {
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for Toggle {
        fn model_name(&self) -> &str {
            "toggle"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("embedding backend offline");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn docx(text: &str) -> Vec<u8> {
        use std::io::Write;
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            write!(
                zip,
                "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
                text
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn indexer(root: &Path, embedder: Arc<Toggle>) -> Indexer {
        let options = IndexerOptions {
            corpus_root: root.to_path_buf(),
            scan: ScanOptions {
                normalize_whitespace: true,
                ..Default::default()
            },
            chunking: ChunkingConfig {
                chunk_size: 20,
                overlap: 5,
            },
            batch_size: 4,
            reuse_existing: true,
        };
        Indexer::new(options, embedder, Arc::new(InMemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn failed_build_is_recorded_and_retried() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("Quality")).unwrap();
        std::fs::write(
            tmp.path().join("Quality/handling.docx"),
            docx("Segregate the nonconforming batch and notify QA."),
        )
        .unwrap();

        let embedder = Arc::new(Toggle {
            fail: AtomicBool::new(true),
        });
        let idx = indexer(tmp.path(), embedder.clone());
        assert_eq!(idx.stats().state, IndexState::Uninitialized);

        let err = idx.ensure_ready().await.err().unwrap();
        assert!(matches!(err, IndexError::BuildFailed { .. }));
        assert!(err.to_string().contains("refresh_sop_database"));
        let stats = idx.stats();
        assert_eq!(stats.state, IndexState::Failed);
        assert!(stats.last_error.unwrap().contains("offline"));

        embedder.fail.store(false, Ordering::SeqCst);
        drop(idx.ensure_ready().await.unwrap());
        let stats = idx.stats();
        assert_eq!(stats.state, IndexState::Ready);
        assert_eq!(stats.generation, 2);
        assert_eq!(stats.report.unwrap().documents_indexed, 1);
    }

    #[tokio::test]
    async fn missing_corpus_is_ready_and_empty() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(
            &tmp.path().join("absent"),
            Arc::new(Toggle {
                fail: AtomicBool::new(false),
            }),
        );
        drop(idx.ensure_ready().await.unwrap());
        let report = idx.stats().report.unwrap();
        assert!(report.empty_corpus);
        assert_eq!(report.chunks_indexed, 0);
    }

    #[test]
    fn rejects_bad_chunking() {
        let options = IndexerOptions {
            corpus_root: PathBuf::from("."),
            scan: ScanOptions::default(),
            chunking: ChunkingConfig {
                chunk_size: 10,
                overlap: 10,
            },
            batch_size: 1,
            reuse_existing: false,
        };
        let result = Indexer::new(
            options,
            Arc::new(Toggle {
                fail: AtomicBool::new(false),
            }),
            Arc::new(InMemoryStore::new()),
        );
        assert!(matches!(result, Err(IndexError::InvalidConfiguration(_))));
    }
}
