//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs next to the chunk
//! metadata in a single `chunks` table. Queries load the candidate rows
//! (narrowed by category in SQL) and score them with cosine similarity in
//! process. A `meta` table records the fingerprint of the build that
//! produced the vectors.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::DocumentSummary;

use super::{rank_matches, ChunkMatch, ChunkRecord, VectorStore};

const FINGERPRINT_KEY: &str = "index_fingerprint";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteVectorStore {
    /// Open the store at `path`, creating the file and schema as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        db::migrate(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }
}

fn to_timestamp(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_match(row: &SqliteRow, query: &[f32]) -> ChunkMatch {
    let blob: Vec<u8> = row.get("embedding");
    let ordinal: i64 = row.get("ordinal");
    ChunkMatch {
        id: row.get("id"),
        text: row.get("text"),
        category: row.get("category"),
        source_path: row.get("source_path"),
        document_name: row.get("document_name"),
        ordinal: ordinal as usize,
        similarity: cosine_similarity(query, &blob_to_vec(&blob)),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, category, source_path, document_name, ordinal,
                                    char_start, char_end, text, hash, modified_at, size_bytes,
                                    embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    category = excluded.category,
                    source_path = excluded.source_path,
                    document_name = excluded.document_name,
                    ordinal = excluded.ordinal,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    text = excluded.text,
                    hash = excluded.hash,
                    modified_at = excluded.modified_at,
                    size_bytes = excluded.size_bytes,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&r.id)
            .bind(&r.category)
            .bind(&r.source_path)
            .bind(&r.document_name)
            .bind(r.ordinal as i64)
            .bind(r.char_start as i64)
            .bind(r.char_end as i64)
            .bind(&r.text)
            .bind(&r.hash)
            .bind(to_timestamp(&r.modified_at))
            .bind(r.size_bytes as i64)
            .bind(vec_to_blob(&r.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<ChunkMatch>> {
        let rows = match category {
            Some(c) => {
                sqlx::query(
                    "SELECT id, text, category, source_path, document_name, ordinal, embedding \
                     FROM chunks WHERE category = ?",
                )
                .bind(c)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, text, category, source_path, document_name, ordinal, embedding \
                     FROM chunks",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let matches: Vec<ChunkMatch> = rows
            .iter()
            .map(|row| row_to_match(row, vector))
            .filter(|m| min_similarity.is_none_or(|min| m.similarity >= min))
            .collect();

        Ok(rank_matches(matches, top_k))
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM meta WHERE key = ?")
            .bind(FINGERPRINT_KEY)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn documents(&self, category: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT source_path, MIN(document_name) AS document_name, MIN(category) AS category,
                   COUNT(*) AS chunks, MAX(modified_at) AS modified_at,
                   MAX(size_bytes) AS size_bytes
            FROM chunks
            WHERE ?1 IS NULL OR category = ?1
            GROUP BY source_path
            ORDER BY category, document_name, source_path
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunks: i64 = row.get("chunks");
                let size_bytes: i64 = row.get("size_bytes");
                DocumentSummary {
                    name: row.get("document_name"),
                    category: row.get("category"),
                    source_path: row.get("source_path"),
                    chunks: chunks as usize,
                    size_bytes: size_bytes as u64,
                    modified_at: from_timestamp(row.get("modified_at")),
                }
            })
            .collect())
    }

    async fn fingerprint(&self) -> Result<Option<String>> {
        let fingerprint: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(FINGERPRINT_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(fingerprint)
    }

    async fn set_fingerprint(&self, fingerprint: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(FINGERPRINT_KEY)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

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
            document_name: "doc".to_string(),
            ordinal,
            char_start: ordinal * 10,
            char_end: ordinal * 10 + 10,
            hash: "h".to_string(),
            modified_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            size_bytes: 4096,
        }
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data/sop.sqlite");
        {
            let store = SqliteVectorStore::open(&path).await.unwrap();
            store
                .upsert(&[
                    record("a", "Quality", "Quality/x.pdf", 0, vec![1.0, 0.0]),
                    record("b", "Quality", "Quality/x.pdf", 1, vec![0.6, 0.8]),
                    record("c", "Audit", "Audit/y.pdf", 0, vec![0.0, 1.0]),
                ])
                .await
                .unwrap();
            store.set_fingerprint("mock-model").await.unwrap();
        }

        let store = SqliteVectorStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(
            store.fingerprint().await.unwrap().as_deref(),
            Some("mock-model")
        );

        let hits = store.query(&[1.0, 0.0], 2, None, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let hits = store.query(&[1.0, 0.0], 5, Some("Audit"), None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");

        let hits = store.query(&[1.0, 0.0], 5, None, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_clear_empties() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("s.sqlite")).await.unwrap();
        let records = vec![
            record("a", "Quality", "Quality/x.pdf", 0, vec![1.0, 0.0]),
            record("b", "Quality", "Quality/x.pdf", 1, vec![0.0, 1.0]),
        ];
        store.upsert(&records).await.unwrap();
        store.upsert(&records).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let docs = store.documents(Some("Quality")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunks, 2);
        assert_eq!(docs[0].modified_at.timestamp(), 1_700_000_000);
        assert_eq!(docs[0].size_bytes, 4096);
        assert!(store.documents(Some("Audit")).await.unwrap().is_empty());

        store.set_fingerprint("m").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.fingerprint().await.unwrap(), None);
    }
}
