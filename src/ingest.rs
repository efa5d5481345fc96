//! Ingestion pipeline.
//!
//! Loads every document under `docs_dir`, splits it into chunks, embeds the
//! chunks in batches and appends them to the store:
//!
//! ```text
//! DocumentLoader → TextChunker → EmbeddingProvider → SqliteVectorStore
//! ```
//!
//! Ingest always writes into the store it is given; clearing the previous
//! contents is the caller's job (see [`Harness::rebuild`](crate::harness::Harness::rebuild)).
//! The build metadata (`built_at`) is written last, so a store without it
//! was never finished. An empty corpus is not an error: the report carries
//! `empty_corpus = true` and the store holds no records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use askdocs_core::chunk::TextChunker;
use askdocs_core::embedding::{embed_checked, EmbeddingProvider};
use askdocs_core::models::EmbeddingVector;
use askdocs_core::store::VectorStore;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::loader::DocumentLoader;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sqlite_store::{SqliteVectorStore, META_BUILD_ID, META_BUILT_AT};

/// Result of one ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub documents: usize,
    /// Files skipped because they could not be read or extracted.
    pub failed_files: Vec<(PathBuf, String)>,
    pub chunks: usize,
    pub records: usize,
    /// No documents were found; the store was left empty.
    pub empty_corpus: bool,
    pub model: String,
    pub dims: usize,
}

/// Run the ingest pipeline described by `config` into `store`.
pub async fn ingest(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    store: &SqliteVectorStore,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let chunker = TextChunker::new(
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.separators.clone(),
    )?;
    let loader = DocumentLoader::new(&config.paths.docs_dir, &config.loader)?;

    progress.report(IngestProgressEvent::Loading {
        dir: loader.root().display().to_string(),
    });
    let outcome = loader.load();

    let mut report = IngestReport {
        files_seen: outcome.files_seen,
        documents: outcome.documents.len(),
        failed_files: outcome.failed,
        model: embedder.model_name().to_string(),
        dims: embedder.dims(),
        ..IngestReport::default()
    };

    if outcome.documents.is_empty() {
        warn!(dir = %loader.root().display(), "no documents found; store left empty");
        report.empty_corpus = true;
        record_build(store, embedder).await?;
        return Ok(report);
    }

    let chunks = chunker.split_documents(&outcome.documents);
    report.chunks = chunks.len();
    progress.report(IngestProgressEvent::Chunked {
        documents: report.documents as u64,
        chunks: chunks.len() as u64,
    });

    let total = chunks.len() as u64;
    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_checked(embedder, &texts)
            .await
            .with_context(|| format!("Failed to embed chunks with '{}'", embedder.model_name()))?;
        let vectors: Vec<EmbeddingVector> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingVector {
                chunk_id: chunk.id.clone(),
                vector,
                model: embedder.model_name().to_string(),
            })
            .collect();

        report.records += store.add(batch, &vectors).await?;
        progress.report(IngestProgressEvent::Embedding {
            n: report.records as u64,
            total,
        });
    }

    record_build(store, embedder).await?;

    info!(
        documents = report.documents,
        chunks = report.chunks,
        records = report.records,
        failed = report.failed_files.len(),
        "ingest complete"
    );
    Ok(report)
}

async fn record_build(store: &SqliteVectorStore, embedder: &dyn EmbeddingProvider) -> Result<()> {
    store.set_model_info(embedder.model_name(), embedder.dims()).await?;
    store.set_meta(META_BUILD_ID, &Uuid::new_v4().to_string()).await?;
    store.set_meta(META_BUILT_AT, &Utc::now().to_rfc3339()).await
}
