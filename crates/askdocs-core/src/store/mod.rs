//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the seam between the retrieval pipeline and
//! its persistence backend. The app crate provides a SQLite-backed store;
//! [`memory::InMemoryVectorStore`] serves tests and ephemeral sessions.
//!
//! Stores are append-only between rebuilds: records are never updated in
//! place, and a rebuild replaces the whole store.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{Chunk, EmbeddingVector, SearchHit};

/// Persistent (or in-memory) collection of embedded chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Append chunks with their vectors |
/// | [`similarity_search`](VectorStore::similarity_search) | k nearest records by cosine distance |
/// | [`count`](VectorStore::count) | Number of stored records |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append chunks paired with their embeddings. Returns the number of
    /// records written.
    ///
    /// `chunks` and `vectors` must have equal length; the i-th vector
    /// embeds the i-th chunk.
    async fn add(&self, chunks: &[Chunk], vectors: &[EmbeddingVector]) -> Result<usize>;

    /// Return up to `k` records ordered by ascending cosine distance to
    /// `query`. Ties keep insertion order. Fails when `k == 0`.
    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }
}

/// Validate the arguments of [`VectorStore::add`].
pub fn check_add(chunks: &[Chunk], vectors: &[EmbeddingVector]) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "cannot add {} chunks with {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    for (chunk, vector) in chunks.iter().zip(vectors) {
        if chunk.id != vector.chunk_id {
            bail!(
                "vector for chunk {} paired with chunk {}",
                vector.chunk_id,
                chunk.id
            );
        }
    }
    Ok(())
}

/// Rank `(vector, hit)` candidates by cosine distance to
/// `query` and keep the best `k`.
///
/// Candidates must be supplied in insertion order; the stable sort keeps
/// that order among equal distances.
///
/// # Errors
///
/// Fails when `k == 0`, or when a stored vector's dimension differs from
/// the query's (the store was built with another embedding model).
pub fn rank_by_distance<I>(query: &[f32], k: usize, candidates: I) -> Result<Vec<SearchHit>>
where
    I: IntoIterator<Item = (Vec<f32>, SearchHit)>,
{
    if k == 0 {
        bail!("similarity search requires k > 0");
    }
    let mut hits = Vec::new();
    for (vector, mut hit) in candidates {
        if vector.len() != query.len() {
            bail!(
                "stored vector for chunk {} has {} dimensions but the query has {}; rebuild the store with the current embedding model",
                hit.chunk_id,
                vector.len(),
                query.len()
            );
        }
        hit.distance = cosine_distance(query, &vector);
        hits.push(hit);
    }
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.truncate(k);
    Ok(hits)
}
