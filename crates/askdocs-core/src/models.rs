//! Core data models used throughout askdocs.
//!
//! These types represent the documents, chunks, stored vectors, and query
//! results that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Provenance carried by every document and chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Path of the file the text came from.
    pub source: String,
    /// 1-based page number for paginated formats (PDF).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Normalized text read from one file (or one page of a paginated file).
///
/// Documents are immutable once loaded and are only discarded by a full
/// rebuild of the store.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable ID derived from the source path and page.
    pub id: String,
    pub source_path: String,
    /// MIME type of the original file.
    pub content_type: String,
    pub text: String,
    pub metadata: SourceMetadata,
}

impl Document {
    pub fn new(
        source_path: impl Into<String>,
        page: Option<u32>,
        content_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let source_path = source_path.into();
        let id = document_id(&source_path, page);
        Self {
            id,
            metadata: SourceMetadata {
                source: source_path.clone(),
                page,
            },
            source_path,
            content_type: content_type.into(),
            text: text.into(),
        }
    }
}

/// Derive a document ID: SHA-256 of `source` and page, truncated to 32 hex chars.
pub fn document_id(source: &str, page: Option<u32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    if let Some(p) = page {
        hasher.update(b"#page=");
        hasher.update(p.to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// A contiguous slice of a document's text; the unit of retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position of the chunk within its document, starting at 0.
    pub ordinal: usize,
    pub text: String,
    /// Length of `text` in characters.
    pub length: usize,
    /// Character offset of the chunk start within the document text.
    pub start: usize,
    /// Characters shared with the previous chunk of the same document.
    pub overlap_prev: usize,
    /// SHA-256 of `text`.
    pub hash: String,
    pub metadata: SourceMetadata,
}

impl Chunk {
    /// Character offset one past the chunk end.
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// An embedding computed for one chunk by one model.
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// A record returned by nearest-neighbor search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub metadata: SourceMetadata,
    /// Cosine distance (`1 - cosine similarity`) to the query vector.
    pub distance: f32,
}

/// One question/answer exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// How a query cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The language model produced an answer from retrieved context.
    Answered,
    /// The store held nothing to retrieve; no model was called.
    NoRelevantDocuments,
    /// The question was blank.
    Rejected,
    /// A condense, retrieve, rerank, or generate step failed.
    Failed,
}

/// A source chunk shown alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub snippet: String,
    pub distance: f32,
    /// Cross-encoder score, when reranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// The single response shape for every query, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    /// Ranked sources, one per source document.
    pub sources: Vec<SourceRef>,
    pub outcome: QueryOutcome,
    /// The standalone question used for retrieval, when condensation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone_question: Option<String>,
}

impl QueryResult {
    pub fn without_sources(answer: impl Into<String>, outcome: QueryOutcome) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            outcome,
            standalone_question: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.outcome == QueryOutcome::Answered
    }
}
