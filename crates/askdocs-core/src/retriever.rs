//! Conversational retrieval: one query cycle from question to answer.
//!
//! [`ConversationalRetriever::query`] runs the cycle
//!
//! ```text
//! RECEIVE → CONDENSE → RETRIEVE → RERANK → GENERATE → RECORD → RETURN
//! ```
//!
//! against a borrowed [`VectorStore`]. Every outcome, including failures of
//! the embedding model, the store, the cross-encoder, or the language
//! model, is returned as a [`QueryResult`]; `query` itself never fails.
//!
//! Condensation only runs when memory is enabled and holds at least one
//! turn. Reranking only runs when enabled and a [`CrossEncoder`] was
//! supplied; otherwise the first `top_n` retrieval hits are used.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info};

use crate::embedding::EmbeddingProvider;
use crate::llm::{ChatMessage, LanguageModel};
use crate::memory::ConversationMemory;
use crate::models::{ConversationTurn, QueryOutcome, QueryResult, SearchHit, SourceRef};
use crate::prompt::{self, PromptLanguage};
use crate::rerank::{self, CrossEncoder};
use crate::store::VectorStore;

/// Maximum characters of chunk text shown in a [`SourceRef`] snippet.
pub const SNIPPET_CHARS: usize = 240;

/// Tunables of the query cycle.
#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    /// Candidates fetched from the vector store.
    pub top_k: usize,
    /// Chunks kept for the answer context.
    pub top_n: usize,
    pub enable_rerank: bool,
    pub enable_memory: bool,
    /// Distinct source documents listed in a result.
    pub max_sources: usize,
    pub language: PromptLanguage,
    /// Bound on remembered turns; `None` keeps every turn.
    pub max_turns: Option<usize>,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            top_k: 15,
            top_n: 8,
            enable_rerank: true,
            enable_memory: true,
            max_sources: 4,
            language: PromptLanguage::En,
            max_turns: None,
        }
    }
}

/// A chunk that made it into the answer context.
struct ContextChunk {
    hit: SearchHit,
    rerank_score: Option<f32>,
}

/// Orchestrates condensation, retrieval, reranking, generation, and memory.
///
/// Capabilities are injected at construction. The retriever owns the
/// session's conversation memory; the vector store is passed per query so
/// the owner can swap it on rebuild.
pub struct ConversationalRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    reranker: Option<Arc<dyn CrossEncoder>>,
    memory: Mutex<ConversationMemory>,
    settings: RetrieverSettings,
}

impl ConversationalRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        reranker: Option<Arc<dyn CrossEncoder>>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            embedder,
            llm,
            reranker,
            memory: Mutex::new(ConversationMemory::bounded(settings.max_turns)),
            settings,
        }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Answer `question` from `store`.
    pub async fn query(&self, store: &dyn VectorStore, question: &str) -> QueryResult {
        let lang = self.settings.language;
        let question = question.trim();
        if question.is_empty() {
            debug!("rejected blank question");
            return QueryResult::without_sources(lang.blank_question(), QueryOutcome::Rejected);
        }

        match self.run(store, question).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %format!("{:#}", e), "query failed");
                QueryResult::without_sources(lang.query_failed(&e), QueryOutcome::Failed)
            }
        }
    }

    /// Empty the conversation memory.
    pub fn clear_memory(&self) {
        self.memory().clear();
        info!("conversation memory cleared");
    }

    /// Snapshot of the remembered turns, oldest first.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.memory().turns().cloned().collect()
    }

    fn memory(&self) -> MutexGuard<'_, ConversationMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, store: &dyn VectorStore, question: &str) -> Result<QueryResult> {
        let lang = self.settings.language;

        if store.is_empty().await.context("checking vector store")? {
            info!("vector store is empty; skipping generation");
            return Ok(QueryResult::without_sources(
                lang.no_relevant_documents(),
                QueryOutcome::NoRelevantDocuments,
            ));
        }

        // CONDENSE
        let history = if self.settings.enable_memory {
            let memory = self.memory();
            (!memory.is_empty()).then(|| prompt::format_history(memory.turns()))
        } else {
            None
        };
        let standalone = match &history {
            Some(h) => Some(self.condense(h, question).await?),
            None => None,
        };
        let search_text = standalone.as_deref().unwrap_or(question);

        // RETRIEVE
        let query_vec = self
            .embedder
            .embed_query(search_text)
            .await
            .with_context(|| format!("embedding query with '{}'", self.embedder.model_name()))?;
        let hits = store
            .similarity_search(&query_vec, self.settings.top_k)
            .await
            .context("searching vector store")?;
        debug!(candidates = hits.len(), "retrieved");
        if hits.is_empty() {
            return Ok(QueryResult::without_sources(
                lang.no_relevant_documents(),
                QueryOutcome::NoRelevantDocuments,
            ));
        }

        // RERANK
        let context_chunks = self.narrow(search_text, hits).await?;

        // GENERATE
        let context = prompt::build_context(context_chunks.iter().map(|c| c.hit.text.as_str()));
        let qa = prompt::qa_prompt(lang, &context, search_text, history.as_deref());
        let answer = self
            .llm
            .complete(&[ChatMessage::user(qa)])
            .await
            .with_context(|| format!("generating answer with '{}'", self.llm.model_name()))?;
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            bail!("language model '{}' returned an empty answer", self.llm.model_name());
        }

        // RECORD
        if self.settings.enable_memory {
            self.memory().push(question, answer.clone());
        }

        Ok(QueryResult {
            answer,
            sources: self.sources(context_chunks),
            outcome: QueryOutcome::Answered,
            standalone_question: standalone,
        })
    }

    async fn condense(&self, history: &str, question: &str) -> Result<String> {
        let condense = prompt::condense_prompt(self.settings.language, history, question);
        let rewritten = self
            .llm
            .complete(&[ChatMessage::user(condense)])
            .await
            .with_context(|| format!("condensing question with '{}'", self.llm.model_name()))?;
        let rewritten = rewritten.trim();
        debug!(standalone = rewritten, "condensed question");
        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    async fn narrow(&self, query: &str, hits: Vec<SearchHit>) -> Result<Vec<ContextChunk>> {
        let top_n = self.settings.top_n;
        match (&self.reranker, self.settings.enable_rerank) {
            (Some(encoder), true) => {
                let ranked = rerank::rerank(encoder.as_ref(), query, hits, top_n)
                    .await
                    .with_context(|| format!("reranking with '{}'", encoder.model_name()))?;
                Ok(ranked
                    .into_iter()
                    .map(|r| ContextChunk {
                        hit: r.hit,
                        rerank_score: Some(r.score),
                    })
                    .collect())
            }
            _ => Ok(hits
                .into_iter()
                .take(top_n)
                .map(|hit| ContextChunk {
                    hit,
                    rerank_score: None,
                })
                .collect()),
        }
    }

    /// One source per document, in context rank order, capped at `max_sources`.
    fn sources(&self, chunks: Vec<ContextChunk>) -> Vec<SourceRef> {
        let mut seen = HashSet::new();
        chunks
            .into_iter()
            .filter(|c| seen.insert(c.hit.document_id.clone()))
            .take(self.settings.max_sources)
            .map(|c| SourceRef {
                snippet: c.hit.text.chars().take(SNIPPET_CHARS).collect(),
                document_id: c.hit.document_id,
                chunk_id: c.hit.chunk_id,
                source: c.hit.metadata.source,
                page: c.hit.metadata.page,
                distance: c.hit.distance,
                rerank_score: c.rerank_score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{default_separators, TextChunker};
    use crate::models::{Document, EmbeddingVector};
    use crate::store::memory::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOCAB: [&str; 4] = ["rust", "python", "ocean", "mountain"];

    /// Bag-of-words over a tiny vocabulary.
    #[derive(Default)]
    struct KeywordEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            VOCAB.len()
        }
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("embedding backend unreachable");
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    VOCAB
                        .iter()
                        .map(|w| lower.matches(w).count() as f32 + 0.01)
                        .collect()
                })
                .collect())
        }
    }

    /// Records prompts; answers condense prompts with a fixed rewrite.
    #[derive(Default)]
    struct ScriptedLlm {
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
        fn condense_calls(&self) -> usize {
            self.prompts()
                .iter()
                .filter(|p| p.contains("Standalone question:"))
                .count()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            let prompt = messages[0].content.clone();
            let reply = if prompt.contains("Standalone question:") {
                "What about rust ownership?".to_string()
            } else {
                format!("answer #{}", self.prompts.lock().unwrap().len())
            };
            self.prompts.lock().unwrap().push(prompt);
            Ok(reply)
        }
    }

    /// Scores passages by reversed length, so the shortest passage wins.
    struct ShortestFirst;

    #[async_trait]
    impl CrossEncoder for ShortestFirst {
        fn model_name(&self) -> &str {
            "shortest"
        }
        async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
            Ok(passages.iter().map(|p| -(p.len() as f32)).collect())
        }
    }

    async fn seeded_store(embedder: &KeywordEmbedder) -> InMemoryVectorStore {
        let docs = vec![
            Document::new("rust.txt", None, "text/plain", "Rust ownership keeps rust memory safe.\n\nRust borrow checker rules."),
            Document::new("python.txt", None, "text/plain", "Python is dynamically typed. Rust is not python."),
            Document::new("ocean.txt", None, "text/plain", "The ocean covers most of the planet."),
            Document::new("mountain.txt", None, "text/plain", "A mountain is taller than a hill."),
            Document::new("guide.pdf", Some(2), "application/pdf", "Rust and python interop via rust bindings."),
        ];
        let chunker = TextChunker::new(45, 5, default_separators()).unwrap();
        let chunks = chunker.split_documents(&docs);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap();
        let embedded: Vec<EmbeddingVector> = chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| EmbeddingVector {
                chunk_id: c.id.clone(),
                vector: v,
                model: "keyword".into(),
            })
            .collect();
        let store = InMemoryVectorStore::new();
        store.add(&chunks, &embedded).await.unwrap();
        embedder.calls.store(0, Ordering::SeqCst);
        store
    }

    fn retriever(
        embedder: Arc<KeywordEmbedder>,
        llm: Arc<ScriptedLlm>,
        reranker: Option<Arc<dyn CrossEncoder>>,
        settings: RetrieverSettings,
    ) -> ConversationalRetriever {
        ConversationalRetriever::new(embedder, llm, reranker, settings)
    }

    #[tokio::test]
    async fn blank_question_is_rejected_without_calls() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let r = retriever(embedder.clone(), llm.clone(), None, RetrieverSettings::default());

        let result = r.query(&store, "   \n\t").await;
        assert_eq!(result.outcome, QueryOutcome::Rejected);
        assert!(result.sources.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn empty_store_short_circuits_without_llm() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = InMemoryVectorStore::new();
        let r = retriever(embedder.clone(), llm.clone(), None, RetrieverSettings::default());

        let result = r.query(&store, "What is rust?").await;
        assert_eq!(result.outcome, QueryOutcome::NoRelevantDocuments);
        assert_eq!(result.answer, "No relevant documents found.");
        assert!(result.sources.is_empty());
        assert!(llm.prompts().is_empty());
        assert!(r.history().is_empty());
    }

    #[tokio::test]
    async fn answered_query_dedups_and_caps_sources() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let settings = RetrieverSettings {
            max_sources: 2,
            ..RetrieverSettings::default()
        };
        let r = retriever(embedder.clone(), llm.clone(), None, settings);

        let result = r.query(&store, "Tell me about rust").await;
        assert!(result.is_answered());
        assert_eq!(result.answer, "answer #0");
        assert_eq!(result.sources.len(), 2);
        assert_ne!(result.sources[0].document_id, result.sources[1].document_id);
        assert!(result.sources.iter().all(|s| s.snippet.chars().count() <= SNIPPET_CHARS));
        assert!(result.standalone_question.is_none());

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("User question: Tell me about rust"));
        assert!(prompt.contains("Rust ownership"));
        assert_eq!(r.history().len(), 1);
    }

    #[tokio::test]
    async fn identical_queries_return_same_sources() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let r = retriever(embedder, llm, None, RetrieverSettings::default());

        let first = r.query(&store, "rust and python").await;
        r.clear_memory();
        let second = r.query(&store, "rust and python").await;

        let ids = |res: &QueryResult| res.sources.iter().map(|s| s.chunk_id.clone()).collect::<HashSet<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn follow_up_is_condensed_until_memory_cleared() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let r = retriever(embedder, llm.clone(), None, RetrieverSettings::default());

        r.query(&store, "What is rust?").await;
        assert_eq!(llm.condense_calls(), 0);

        let follow_up = r.query(&store, "How does it manage memory?").await;
        assert_eq!(llm.condense_calls(), 1);
        assert_eq!(follow_up.standalone_question.as_deref(), Some("What about rust ownership?"));
        let condense = llm
            .prompts()
            .into_iter()
            .find(|p| p.contains("Standalone question:"))
            .unwrap();
        assert!(condense.contains("Human: What is rust?"));

        r.clear_memory();
        assert!(r.history().is_empty());
        let after_clear = r.query(&store, "How does it manage memory?").await;
        assert_eq!(llm.condense_calls(), 1);
        assert!(after_clear.standalone_question.is_none());
    }

    #[tokio::test]
    async fn memory_disabled_never_condenses_or_records() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let settings = RetrieverSettings {
            enable_memory: false,
            ..RetrieverSettings::default()
        };
        let r = retriever(embedder, llm.clone(), None, settings);

        r.query(&store, "rust").await;
        r.query(&store, "and it?").await;
        assert_eq!(llm.condense_calls(), 0);
        assert!(r.history().is_empty());
    }

    #[tokio::test]
    async fn bounded_memory_keeps_recent_turns() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let settings = RetrieverSettings {
            max_turns: Some(1),
            ..RetrieverSettings::default()
        };
        let r = retriever(embedder, llm, None, settings);

        r.query(&store, "first about rust").await;
        r.query(&store, "second about ocean").await;
        let history = r.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "second about ocean");
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_failed_result() {
        let ok_embedder = KeywordEmbedder::default();
        let store = seeded_store(&ok_embedder).await;
        let embedder = Arc::new(KeywordEmbedder {
            fail: true,
            ..KeywordEmbedder::default()
        });
        let llm = Arc::new(ScriptedLlm::default());
        let r = retriever(embedder, llm.clone(), None, RetrieverSettings::default());

        let result = r.query(&store, "What is rust?").await;
        assert_eq!(result.outcome, QueryOutcome::Failed);
        assert!(result.sources.is_empty());
        assert!(result.answer.starts_with("An error occurred while processing the query"));
        assert!(result.answer.contains("embedding backend unreachable"));
        assert!(llm.prompts().is_empty());
        assert!(r.history().is_empty());
    }

    #[tokio::test]
    async fn store_built_with_other_dimensions_fails_the_query() {
        let chunker = TextChunker::new(800, 0, default_separators()).unwrap();
        let doc = Document::new("rust.txt", None, "text/plain", "Rust ownership.");
        let chunks = chunker.split_document(&doc);
        let vectors: Vec<EmbeddingVector> = chunks
            .iter()
            .map(|c| EmbeddingVector {
                chunk_id: c.id.clone(),
                vector: vec![1.0, 0.0],
                model: "older-model".into(),
            })
            .collect();
        let store = InMemoryVectorStore::new();
        store.add(&chunks, &vectors).await.unwrap();

        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let r = retriever(embedder, llm.clone(), None, RetrieverSettings::default());

        let result = r.query(&store, "What is rust?").await;
        assert_eq!(result.outcome, QueryOutcome::Failed);
        assert!(result.sources.is_empty());
        assert!(result.answer.contains("rebuild the store"), "{}", result.answer);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn reranker_reorders_context_and_sets_scores() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let settings = RetrieverSettings {
            top_n: 3,
            max_sources: 10,
            ..RetrieverSettings::default()
        };
        let encoder: Arc<dyn CrossEncoder> = Arc::new(ShortestFirst);
        let r = retriever(embedder, llm, Some(encoder), settings);

        let result = r.query(&store, "rust").await;
        assert!(result.is_answered());
        assert!(!result.sources.is_empty() && result.sources.len() <= 3);
        let scores: Vec<f32> = result.sources.iter().map(|s| s.rerank_score.unwrap()).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[tokio::test]
    async fn rerank_disabled_ignores_reranker() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let store = seeded_store(&embedder).await;
        let settings = RetrieverSettings {
            enable_rerank: false,
            ..RetrieverSettings::default()
        };
        let encoder: Arc<dyn CrossEncoder> = Arc::new(ShortestFirst);
        let r = retriever(embedder, llm, Some(encoder), settings);

        let result = r.query(&store, "rust").await;
        assert!(result.sources.iter().all(|s| s.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn chinese_replies_follow_language() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let llm = Arc::new(ScriptedLlm::default());
        let settings = RetrieverSettings {
            language: PromptLanguage::Zh,
            ..RetrieverSettings::default()
        };
        let r = retriever(embedder, llm, None, settings);
        let result = r.query(&InMemoryVectorStore::new(), "什么是 rust？").await;
        assert_eq!(result.answer, "未找到相关文档");
    }
}
