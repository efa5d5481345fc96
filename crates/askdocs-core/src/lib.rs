//! # askdocs core
//!
//! Shared logic for askdocs: data models, the recursive text chunker,
//! the vector store abstraction, cross-encoder reranking, conversation
//! memory, prompt templates, and the conversational retrieval state machine.
//!
//! This crate performs no filesystem or network I/O. Every external
//! capability (embedding model, vector store, cross-encoder, language
//! model) is reached through a trait so the application crate can plug in
//! concrete backends and tests can plug in deterministic doubles.
//!
//! ## Query cycle
//!
//! ```text
//! question ─▶ RECEIVE ─▶ CONDENSE ─▶ RETRIEVE ─▶ RERANK ─▶ GENERATE ─▶ RECORD ─▶ QueryResult
//!               │          (memory)    (store)    (opt.)     (LLM)     (memory)
//!               └─ blank → rejected
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod rerank;
pub mod retriever;
pub mod store;

pub use error::HarnessError;
