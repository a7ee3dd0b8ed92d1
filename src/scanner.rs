//! Corpus scanner: walks the SOP directory tree and yields extracted documents.
//!
//! The corpus layout is one folder per category:
//!
//! ```text
//! sop_documents/
//! ├── SOP01 Quality Management/
//! │   ├── nonconformities.pdf
//! │   └── forms/deviation-report.docx
//! └── SOP02 Internal Audit/
//!     └── audit-plan.pdf
//! ```
//!
//! The category of a document is the name of the top-level folder it sits
//! under, however deep the file itself is. Files placed directly in the
//! root belong to no category and are ignored.
//!
//! [`scan`] returns a [`CorpusScan`], a lazy iterator that reads and
//! extracts one file per `next()` call. Files that cannot be extracted are
//! logged, collected in [`CorpusScan::skipped`] and do not stop the scan.

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::IndexError;
use crate::extract::{extract_text, Format};
use crate::models::{ScannedDocument, SkippedDocument};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/~$*"];

/// Knobs for a scan, usually taken from the `[corpus]` config section.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub normalize_whitespace: bool,
}

impl From<&CorpusConfig> for ScanOptions {
    fn from(config: &CorpusConfig) -> Self {
        Self {
            exclude_globs: config.exclude_globs.clone(),
            follow_symlinks: config.follow_symlinks,
            normalize_whitespace: config.normalize_whitespace,
        }
    }
}

/// Lazy, single-pass iterator over the documents of a corpus.
pub struct CorpusScan {
    root: PathBuf,
    walker: Option<walkdir::IntoIter>,
    exclude: GlobSet,
    normalize_whitespace: bool,
    skipped: Vec<SkippedDocument>,
}

/// Start scanning `root`. Fails only on invalid exclude globs; a missing
/// root produces an empty scan.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<CorpusScan> {
    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    patterns.extend(options.exclude_globs.iter().cloned());
    let exclude = build_globset(&patterns)?;

    let walker = if root.is_dir() {
        Some(
            WalkDir::new(root)
                .min_depth(1)
                .follow_links(options.follow_symlinks)
                .sort_by_file_name()
                .into_iter(),
        )
    } else {
        debug!(root = %root.display(), "corpus root does not exist; nothing to scan");
        None
    };

    Ok(CorpusScan {
        root: root.to_path_buf(),
        walker,
        exclude,
        normalize_whitespace: options.normalize_whitespace,
        skipped: Vec::new(),
    })
}

impl CorpusScan {
    /// Documents recognised but skipped so far.
    pub fn skipped(&self) -> &[SkippedDocument] {
        &self.skipped
    }

    pub fn into_skipped(self) -> Vec<SkippedDocument> {
        self.skipped
    }

    fn load(
        &mut self,
        path: &Path,
        relative_path: String,
        category: String,
        format: Format,
    ) -> Option<ScannedDocument> {
        let loaded = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                let text = extract_text(&bytes, format).map_err(|e| {
                    IndexError::Extraction {
                        path: relative_path.clone(),
                        source: Arc::new(e),
                    }
                    .to_string()
                })?;
                Ok((bytes.len() as u64, text))
            });

        let (size_bytes, mut text) = match loaded {
            Ok(v) => v,
            Err(reason) => {
                self.skip(&relative_path, &category, reason);
                return None;
            }
        };

        if self.normalize_whitespace {
            text = normalize_whitespace(&text);
        }
        if text.trim().is_empty() {
            self.skip(&relative_path, &category, "no extractable text".to_string());
            return None;
        }

        let modified_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        debug!(path = %relative_path, %category, chars = text.chars().count(), "extracted document");

        Some(ScannedDocument {
            relative_path,
            category,
            name,
            modified_at,
            size_bytes,
            text,
        })
    }

    fn skip(&mut self, relative_path: &str, category: &str, reason: String) {
        warn!(path = %relative_path, %category, %reason, "skipping document");
        self.skipped.push(SkippedDocument {
            path: relative_path.to_string(),
            category: category.to_string(),
            reason,
        });
    }
}

impl Iterator for CorpusScan {
    type Item = ScannedDocument;

    fn next(&mut self) -> Option<ScannedDocument> {
        loop {
            let entry = match self.walker.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read corpus entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path().to_path_buf();
            let relative = match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let relative_path = parts.join("/");

            if self.exclude.is_match(&relative_path) {
                continue;
            }
            if parts.len() < 2 {
                debug!(path = %relative_path, "ignoring file outside any category folder");
                continue;
            }
            if parts[0].starts_with('.') {
                continue;
            }

            let format = Format::from_path(&path);
            if format == Format::Unsupported {
                debug!(path = %relative_path, "ignoring unsupported file type");
                continue;
            }

            let category = parts[0].clone();
            if let Some(doc) = self.load(&path, relative_path, category, format) {
                return Some(doc);
            }
        }
    }
}

/// Category folders present under `root`, sorted. Missing root → empty.
pub fn list_categories(root: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut categories: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with('.'))
        .collect();
    categories.sort();
    categories
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
