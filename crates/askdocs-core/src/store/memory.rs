//! In-memory [`VectorStore`] for tests and ephemeral sessions.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`, in insertion order.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{check_add, rank_by_distance, VectorStore};
use crate::models::{Chunk, EmbeddingVector, SearchHit};

struct Record {
    chunk: Chunk,
    vector: Vec<f32>,
}

pub struct InMemoryVectorStore {
    records: RwLock<Vec<Record>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<()> {
        self.records
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?
            .clear();
        Ok(())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, chunks: &[Chunk], vectors: &[EmbeddingVector]) -> Result<usize> {
        check_add(chunks, vectors)?;
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        for (chunk, v) in chunks.iter().zip(vectors) {
            records.push(Record {
                chunk: chunk.clone(),
                vector: v.vector.clone(),
            });
        }
        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        let candidates = records.iter().map(|r| {
            (
                r.vector.clone(),
                SearchHit {
                    chunk_id: r.chunk.id.clone(),
                    document_id: r.chunk.document_id.clone(),
                    ordinal: r.chunk.ordinal,
                    text: r.chunk.text.clone(),
                    metadata: r.chunk.metadata.clone(),
                    distance: 0.0,
                },
            )
        });
        rank_by_distance(query, k, candidates)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .records
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?
            .len())
    }
}
