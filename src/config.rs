//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`])
//! is a valid configuration that indexes `./sop_documents` into
//! `./data/sop.sqlite` with the local multilingual embedding model.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "./config/sop.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Collapse whitespace runs in extracted text before chunking.
    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            normalize_whitespace: true,
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./sop_documents")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/sop.sqlite")
}

/// Chunk window sizes, in characters.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    /// Number of fragments aggregated into a guidance answer.
    #[serde(default = "default_max_results")]
    pub guidance_results: usize,
    /// Drop matches scoring below this cosine similarity.
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            guidance_results: default_max_results(),
            min_similarity: None,
        }
    }
}

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Adopt a non-empty persisted collection on first use instead of
    /// re-embedding the corpus.
    #[serde(default = "default_true")]
    pub reuse_existing: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            reuse_existing: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

impl Config {
    /// All defaults, as used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Load the config at `path`, falling back to defaults when the file is
/// missing and `path` is the default location.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        let config = Config::minimal();
        validate(&config)?;
        return Ok(config);
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    crate::chunk::validate_params(config.chunking.chunk_size, config.chunking.overlap)
        .context("Invalid [chunking] section")?;

    if config.retrieval.default_max_results < 1 {
        anyhow::bail!("retrieval.default_max_results must be >= 1");
    }
    if config.retrieval.guidance_results < 1 {
        anyhow::bail!("retrieval.guidance_results must be >= 1");
    }
    if let Some(min) = config.retrieval.min_similarity {
        if !(-1.0..=1.0).contains(&min) {
            anyhow::bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
        }
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
