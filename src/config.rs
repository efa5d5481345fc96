//! Configuration parsing and validation.
//!
//! askdocs is configured via a TOML file (default: `config/askdocs.toml`).
//! Every section is optional; omitted keys take the defaults shown below.
//!
//! # Example Configuration
//!
//! ```toml
//! [paths]
//! docs_dir = "./docs"
//! persist_dir = "./db"
//! models_dir = "./models"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 150
//!
//! [embedding]
//! provider = "local"           # "local", "openai", or "ollama"
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-3.5-turbo"
//! api_key_env = "OPENAI_API_KEY"
//! temperature = 0.7
//!
//! [reranker]
//! model = "bge-reranker-base"
//!
//! [retrieval]
//! top_k = 15
//! top_n = 8
//! enable_rerank = true
//! max_sources = 4
//! prompt_language = "en"       # "en" or "zh"
//!
//! [memory]
//! enabled = true
//! # max_turns = 20
//!
//! [loader]
//! include_globs = ["**/*.pdf", "**/*.docx", "**/*.doc", "**/*.txt", "**/*.md"]
//! exclude_globs = []
//! follow_symlinks = false
//! ```
//!
//! Relative paths in `[paths]` are resolved against the directory holding
//! the config file. API keys are never stored in the file; `api_key_env`
//! names the environment variable that holds them.
//!
//! # Validation
//!
//! [`load_config`] rejects, as [`HarnessError::Configuration`]:
//! - `chunk_size == 0` or `chunk_overlap >= chunk_size`
//! - an empty separator list, or one whose last entry is not `""`
//! - `top_k < 1`, `top_n` outside `1..=top_k`, `max_sources < 1`
//! - `temperature` outside `[0, 2]`
//! - unknown embedding providers, or a remote provider without `dims`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use askdocs_core::chunk::default_separators;
use askdocs_core::prompt::PromptLanguage;
use askdocs_core::retriever::RetrieverSettings;
use askdocs_core::HarnessError;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Corpus directory, read-only.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    /// Directory owned by the vector store.
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    /// Local model directory, also used as the download cache.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            persist_dir: default_persist_dir(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}
fn default_persist_dir() -> PathBuf {
    PathBuf::from("db")
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Chunk sizes are measured in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    askdocs_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    askdocs_core::chunk::DEFAULT_CHUNK_OVERLAP
}

/// Embedding provider settings.
///
/// `dims` is required for `openai` and `ollama`; for `local` it is taken
/// from the model when omitted.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override for remote providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model")]
    pub model: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: default_reranker_model(),
        }
    }
}

fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched by vector search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunks kept after reranking.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_true")]
    pub enable_rerank: bool,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default)]
    pub prompt_language: PromptLanguage,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_n: default_top_n(),
            enable_rerank: true,
            max_sources: default_max_sources(),
            prompt_language: PromptLanguage::default(),
        }
    }
}

fn default_top_k() -> usize {
    15
}
fn default_top_n() -> usize {
    8
}
fn default_max_sources() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_turns: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_turns: None,
        }
    }
}

/// Which files under `docs_dir` are loaded.
#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.docx", "**/*.doc", "**/*.txt", "**/*.md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Parse and validate TOML, resolving relative paths against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.paths.docs_dir = resolve(base_dir, &config.paths.docs_dir);
        config.paths.persist_dir = resolve(base_dir, &config.paths.persist_dir);
        config.paths.models_dir = resolve(base_dir, &config.paths.models_dir);
        config.validate()?;
        Ok(config)
    }

    /// Path of the SQLite database inside `persist_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.paths.persist_dir.join("askdocs.sqlite")
    }

    /// Settings for the query cycle.
    pub fn retriever_settings(&self) -> RetrieverSettings {
        RetrieverSettings {
            top_k: self.retrieval.top_k,
            top_n: self.retrieval.top_n,
            enable_rerank: self.retrieval.enable_rerank,
            enable_memory: self.memory.enabled,
            max_sources: self.retrieval.max_sources,
            language: self.retrieval.prompt_language,
            max_turns: self.memory.max_turns,
        }
    }

    fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            bail!(HarnessError::Configuration("chunking.chunk_size must be > 0".into()));
        }
        if c.chunk_overlap >= c.chunk_size {
            bail!(HarnessError::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.separators.last().map(String::as_str) != Some("") {
            bail!(HarnessError::Configuration(
                "chunking.separators must be non-empty and end with \"\"".into()
            ));
        }

        let r = &self.retrieval;
        if r.top_k < 1 {
            bail!(HarnessError::Configuration("retrieval.top_k must be >= 1".into()));
        }
        if r.top_n < 1 || r.top_n > r.top_k {
            bail!(HarnessError::Configuration(format!(
                "retrieval.top_n must be in [1, top_k={}], got {}",
                r.top_k, r.top_n
            )));
        }
        if r.max_sources < 1 {
            bail!(HarnessError::Configuration("retrieval.max_sources must be >= 1".into()));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!(HarnessError::Configuration(
                "llm.temperature must be in [0.0, 2.0]".into()
            ));
        }

        let e = &self.embedding;
        if e.batch_size == 0 {
            bail!(HarnessError::Configuration("embedding.batch_size must be > 0".into()));
        }
        match e.provider.as_str() {
            "local" => {}
            "openai" | "ollama" => {
                if e.dims.unwrap_or(0) == 0 {
                    bail!(HarnessError::Configuration(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        e.provider
                    )));
                }
            }
            other => bail!(HarnessError::Configuration(format!(
                "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
                other
            ))),
        }

        Ok(())
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load, parse, and validate a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// fails validation.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    Config::from_toml_str(&content, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Config> {
        Config::from_toml_str(s, Path::new("/srv/askdocs"))
    }

    fn config_error(s: &str) -> String {
        let err = parse(s).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<HarnessError>(), Some(HarnessError::Configuration(_))),
            "expected a configuration error, got: {:#}",
            err
        );
        err.to_string()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.chunking.chunk_size, 800);
        assert_eq!(c.chunking.chunk_overlap, 150);
        assert_eq!(c.chunking.separators.last().map(String::as_str), Some(""));
        assert_eq!(c.embedding.provider, "local");
        assert_eq!(c.embedding.model, "all-minilm-l6-v2");
        assert_eq!(c.llm.model, "gpt-3.5-turbo");
        assert_eq!(c.retrieval.top_k, 15);
        assert_eq!(c.retrieval.top_n, 8);
        assert_eq!(c.retrieval.max_sources, 4);
        assert!(c.retrieval.enable_rerank);
        assert!(c.memory.enabled);
        assert_eq!(c.memory.max_turns, None);
        assert_eq!(c.reranker.model, "bge-reranker-base");
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let c = parse("[paths]\ndocs_dir = \"corpus\"\npersist_dir = \"/var/lib/askdocs\"\n").unwrap();
        assert_eq!(c.paths.docs_dir, PathBuf::from("/srv/askdocs/corpus"));
        assert_eq!(c.paths.persist_dir, PathBuf::from("/var/lib/askdocs"));
        assert_eq!(c.db_path(), PathBuf::from("/var/lib/askdocs/askdocs.sqlite"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let msg = config_error("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        assert!(msg.contains("chunk_overlap"));
    }

    #[test]
    fn rejects_separators_without_hard_cutoff() {
        config_error("[chunking]\nseparators = [\"\\n\\n\", \" \"]\n");
        config_error("[chunking]\nseparators = []\n");
    }

    #[test]
    fn rejects_bad_retrieval_bounds() {
        config_error("[retrieval]\ntop_k = 0\n");
        config_error("[retrieval]\ntop_k = 5\ntop_n = 6\n");
        config_error("[retrieval]\nmax_sources = 0\n");
    }

    #[test]
    fn rejects_bad_temperature() {
        config_error("[llm]\ntemperature = 2.5\n");
    }

    #[test]
    fn remote_provider_requires_dims() {
        config_error("[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n");
        let c = parse("[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n").unwrap();
        assert_eq!(c.embedding.dims, Some(768));
    }

    #[test]
    fn rejects_unknown_provider() {
        let msg = config_error("[embedding]\nprovider = \"magic\"\n");
        assert!(msg.contains("magic"));
    }

    #[test]
    fn retriever_settings_mirror_config() {
        let c = parse(
            "[retrieval]\nprompt_language = \"zh\"\nenable_rerank = false\n[memory]\nenabled = false\nmax_turns = 3\n",
        )
        .unwrap();
        let s = c.retriever_settings();
        assert_eq!(s.language, PromptLanguage::Zh);
        assert!(!s.enable_rerank);
        assert!(!s.enable_memory);
        assert_eq!(s.max_turns, Some(3));
    }
}
