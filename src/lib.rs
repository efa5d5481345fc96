//! # askdocs
//!
//! Conversational question answering over a local document folder.
//!
//! Documents under `docs_dir` (PDF, DOCX, plain text) are split into
//! overlapping chunks, embedded, and stored in a SQLite vector store under
//! `persist_dir`. A question is optionally condensed against the
//! conversation so far, matched against the store, reranked with a
//! cross-encoder, and answered by an OpenAI-compatible chat model from the
//! retrieved context only.
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│  SQLite  │
//! └──────────┘   └─────────┘   └──────────┘   └────┬─────┘
//!                                                   │
//!       question ──▶ condense ──▶ retrieve ◀────────┘
//!                                   │
//!                                rerank ──▶ generate ──▶ QueryResult
//! ```
//!
//! The pipeline types (chunker, store trait, retriever state machine,
//! prompts) live in `askdocs-core`; this crate supplies the file loader,
//! concrete models, persistence, and the CLI.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`loader`] | Corpus directory walker |
//! | [`embedding`] | Local, OpenAI, and Ollama embedders |
//! | [`rerank`] | fastembed cross-encoder |
//! | [`llm`] | OpenAI-compatible chat client |
//! | [`sqlite_store`] | Persisted vector store |
//! | [`ingest`] | Ingestion pipeline |
//! | [`harness`] | Ingest / rebuild / query facade |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod harness;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod model_cache;
pub mod progress;
pub mod rerank;
pub mod sqlite_store;
pub mod stats;
