//! SQLite-backed [`VectorStore`].
//!
//! Records are appended inside one transaction per [`add`](VectorStore::add)
//! call, so a batch is durable once `add` returns. Similarity search is a
//! brute-force cosine scan over every stored vector, which is adequate for
//! corpora of a few hundred thousand chunks.

use std::path::{Path, PathBuf};

use anyhow::Result;
use askdocs_core::embedding::{blob_to_vec, vec_to_blob};
use askdocs_core::models::{Chunk, EmbeddingVector, SearchHit, SourceMetadata};
use askdocs_core::store::{check_add, rank_by_distance, VectorStore};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;

pub const META_MODEL: &str = "embedding_model";
pub const META_DIMS: &str = "embedding_dims";
pub const META_BUILD_ID: &str = "build_id";
pub const META_BUILT_AT: &str = "built_at";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteVectorStore {
    /// Open the store at `db_path`, creating an empty one if needed.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        db::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection. Required before deleting the files.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Copy the write-ahead log into the database file and truncate it.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Embedding model and dimensions the stored vectors were built with.
    pub async fn model_info(&self) -> Result<Option<(String, usize)>> {
        let model = self.get_meta(META_MODEL).await?;
        let dims = self.get_meta(META_DIMS).await?;
        Ok(match (model, dims) {
            (Some(m), Some(d)) => d.parse().ok().map(|d| (m, d)),
            _ => None,
        })
    }

    pub async fn set_model_info(&self, model: &str, dims: usize) -> Result<()> {
        self.set_meta(META_MODEL, model).await?;
        self.set_meta(META_DIMS, &dims.to_string()).await
    }

    /// Number of distinct source documents.
    pub async fn document_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, chunks: &[Chunk], vectors: &[EmbeddingVector]) -> Result<usize> {
        check_add(chunks, vectors)?;
        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO records (id, document_id, ordinal, source, page, text, hash, model, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.metadata.source)
            .bind(chunk.metadata.page.map(i64::from))
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&vector.model)
            .bind(vec_to_blob(&vector.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, document_id, ordinal, source, page, text, embedding FROM records ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let ordinal: i64 = row.get("ordinal");
            let page: Option<i64> = row.get("page");
            (
                blob_to_vec(&blob),
                SearchHit {
                    chunk_id: row.get("id"),
                    document_id: row.get("document_id"),
                    ordinal: ordinal as usize,
                    text: row.get("text"),
                    metadata: SourceMetadata {
                        source: row.get("source"),
                        page: page.map(|p| p as u32),
                    },
                    distance: 0.0,
                },
            )
        });
        rank_by_distance(query, k, candidates)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdocs_core::chunk::{default_separators, TextChunker};
    use askdocs_core::models::Document;
    use tempfile::TempDir;

    fn embedded(doc: &Document, vector: Vec<f32>) -> (Vec<Chunk>, Vec<EmbeddingVector>) {
        let chunks = TextChunker::new(800, 100, default_separators())
            .unwrap()
            .split_document(doc);
        let vectors = chunks
            .iter()
            .map(|c| EmbeddingVector {
                chunk_id: c.id.clone(),
                vector: vector.clone(),
                model: "test-model".into(),
            })
            .collect();
        (chunks, vectors)
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("askdocs.sqlite");
        {
            let store = SqliteVectorStore::open(&path).await.unwrap();
            let doc = Document::new("manual.pdf", Some(4), "application/pdf", "Page four text.");
            let (chunks, vectors) = embedded(&doc, vec![1.0, 0.0]);
            assert_eq!(store.add(&chunks, &vectors).await.unwrap(), 1);
            store.set_model_info("test-model", 2).await.unwrap();
            store.close().await;
        }

        let store = SqliteVectorStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(
            store.model_info().await.unwrap(),
            Some(("test-model".to_string(), 2))
        );
        let hits = store.similarity_search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Page four text.");
        assert_eq!(hits[0].metadata.page, Some(4));
        assert_eq!(hits[0].metadata.source, "manual.pdf");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_orders_by_distance_then_insertion() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("s.sqlite")).await.unwrap();
        for (name, v) in [("far", vec![0.0, 1.0]), ("tie-a", vec![1.0, 0.0]), ("tie-b", vec![2.0, 0.0])] {
            let doc = Document::new(format!("{}.txt", name), None, "text/plain", name);
            let (chunks, vectors) = embedded(&doc, v);
            store.add(&chunks, &vectors).await.unwrap();
        }
        let hits = store.similarity_search(&[1.0, 0.0], 3).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["tie-a", "tie-b", "far"]);
        assert_eq!(store.document_count().await.unwrap(), 3);
        assert_eq!(store.similarity_search(&[1.0, 0.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_store_searches_to_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("s.sqlite")).await.unwrap();
        assert!(store.is_empty().await.unwrap());
        assert!(store.similarity_search(&[1.0], 3).await.unwrap().is_empty());
        assert!(store.similarity_search(&[1.0], 0).await.is_err());
        assert_eq!(store.model_info().await.unwrap(), None);
    }
}
