//! Concrete embedding providers.
//!
//! | `embedding.provider` | Provider | Notes |
//! |----------------------|----------|-------|
//! | `"local"` | [`LocalEmbedder`] | fastembed ONNX model, feature `local-models` |
//! | `"openai"` | [`OpenAIEmbedder`] | `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`] | `POST /api/embed` |
//!
//! Local models are resolved from `models_dir` first: a directory
//! `models_dir/<model>` holding an ONNX sentence-transformer export is loaded
//! as-is. Otherwise the model is looked up in the fastembed catalog and
//! downloaded into `models_dir`, which then acts as the cache.
//!
//! Remote calls are not retried; a failed request surfaces immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use askdocs_core::embedding::EmbeddingProvider;
use askdocs_core::HarnessError;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

/// Build the embedding provider named by `config.provider`.
///
/// `models_dir` and `cache` are only used by the local provider.
///
/// # Errors
///
/// Returns [`HarnessError::ModelResolution`] for an unknown local model or
/// a build without local model support, and [`HarnessError::Configuration`]
/// for a remote provider whose API key variable is unset.
pub fn create_embedder(
    config: &EmbeddingConfig,
    models_dir: &std::path::Path,
    cache: &Arc<LocalModelCache>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config, models_dir, Arc::clone(cache))?)),
        #[cfg(not(feature = "local-models"))]
        "local" => {
            let _ = (models_dir, cache);
            bail!(HarnessError::model_resolution(
                &config.model,
                "askdocs was built without the `local-models` feature"
            ))
        }
        other => bail!(HarnessError::Configuration(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

/// Cache of loaded local embedding models.
#[cfg(feature = "local-models")]
pub type LocalModelCache = crate::model_cache::ModelCache<fastembed::TextEmbedding>;

/// Placeholder cache type when local models are compiled out.
#[cfg(not(feature = "local-models"))]
pub type LocalModelCache = crate::model_cache::ModelCache<()>;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn api_key_from_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| {
        anyhow!(HarnessError::Configuration(format!(
            "{} environment variable not set",
            var
        )))
    })
}

// ============ OpenAI ============

/// Embeddings from an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            model: config.model.clone(),
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            api_key: api_key_from_env(&config.api_key_env)?,
            batch_size: config.batch_size,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("OpenAI embeddings request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                bail!(HarnessError::model_resolution(&self.model, body_text));
            }
            bail!("OpenAI API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_floats(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            model: config.model.clone(),
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            batch_size: config.batch_size,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                bail!(HarnessError::model_resolution(&self.model, body_text));
            }
            bail!("Ollama API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|values| json_floats(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Files that make up a sentence-transformer ONNX export.
pub const LOCAL_MODEL_FILES: [&str; 5] = [
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

/// Where a local model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    /// A complete export under `models_dir/<model>`.
    Directory(std::path::PathBuf),
    /// A fastembed catalog model, downloaded into `models_dir`.
    Catalog,
}

/// Decide how to load `model`: a local directory wins over the catalog.
pub fn resolve_local_source(models_dir: &std::path::Path, model: &str) -> LocalSource {
    let dir = models_dir.join(model);
    if LOCAL_MODEL_FILES.iter().all(|f| dir.join(f).is_file()) {
        LocalSource::Directory(dir)
    } else {
        LocalSource::Catalog
    }
}

/// Known output dimensions of catalog models.
pub fn catalog_dims(model: &str) -> Option<usize> {
    match model {
        "all-minilm-l6-v2" | "all-minilm-l12-v2" => Some(384),
        "paraphrase-multilingual-minilm-l12-v2" => Some(384),
        "bge-small-en-v1.5" | "bge-small-zh-v1.5" => Some(384),
        "bge-base-en-v1.5" => Some(768),
        "bge-large-en-v1.5" | "bge-large-zh-v1.5" => Some(1024),
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => Some(768),
        "multilingual-e5-small" => Some(384),
        "multilingual-e5-base" => Some(768),
        "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

/// Read `hidden_size` from a local export's `config.json`.
#[cfg_attr(not(feature = "local-models"), allow(dead_code))]
fn dims_from_model_config(dir: &std::path::Path) -> Option<usize> {
    let raw = std::fs::read_to_string(dir.join("config.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&raw).ok()?;
    json.get("hidden_size")?.as_u64().map(|d| d as usize)
}

#[cfg(feature = "local-models")]
fn catalog_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "paraphrase-multilingual-minilm-l12-v2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-small-zh-v1.5" => Ok(EmbeddingModel::BGESmallZHV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "bge-large-zh-v1.5" => Ok(EmbeddingModel::BGELargeZHV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => bail!(HarnessError::model_resolution(
            other,
            "not found in the models directory and not a known catalog model"
        )),
    }
}

/// Local ONNX inference through fastembed.
///
/// The model is loaded on first use (blocking, on the tokio blocking pool)
/// and kept in the shared [`LocalModelCache`].
#[cfg(feature = "local-models")]
pub struct LocalEmbedder {
    model: String,
    dims: usize,
    source: LocalSource,
    models_dir: std::path::PathBuf,
    batch_size: usize,
    cache: Arc<LocalModelCache>,
}

#[cfg(feature = "local-models")]
impl LocalEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        models_dir: &std::path::Path,
        cache: Arc<LocalModelCache>,
    ) -> Result<Self> {
        let source = resolve_local_source(models_dir, &config.model);
        let dims = match &source {
            LocalSource::Directory(dir) => config
                .dims
                .or_else(|| dims_from_model_config(dir))
                .or_else(|| catalog_dims(&config.model)),
            LocalSource::Catalog => {
                catalog_model(&config.model)?;
                config.dims.or_else(|| catalog_dims(&config.model))
            }
        }
        .ok_or_else(|| {
            anyhow!(HarnessError::model_resolution(
                &config.model,
                "cannot determine embedding dimensions; set embedding.dims"
            ))
        })?;

        Ok(Self {
            model: config.model.clone(),
            dims,
            source,
            models_dir: models_dir.to_path_buf(),
            batch_size: config.batch_size,
            cache,
        })
    }
}

#[cfg(feature = "local-models")]
fn load_local_model(
    model: &str,
    source: &LocalSource,
    models_dir: &std::path::Path,
) -> Result<fastembed::TextEmbedding> {
    use fastembed::{
        InitOptions, InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles,
        UserDefinedEmbeddingModel,
    };

    match source {
        LocalSource::Directory(dir) => {
            tracing::info!(model, dir = %dir.display(), "loading local embedding model");
            let read = |name: &str| {
                std::fs::read(dir.join(name))
                    .with_context(|| format!("reading {}", dir.join(name).display()))
            };
            let tokenizer_files = TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            };
            let user_model = UserDefinedEmbeddingModel::new(read("model.onnx")?, tokenizer_files)
                .with_pooling(Pooling::Mean);
            TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
                .map_err(|e| anyhow!(HarnessError::model_resolution(model, e)))
        }
        LocalSource::Catalog => {
            tracing::info!(model, cache = %models_dir.display(), "loading catalog embedding model");
            let options = InitOptions::new(catalog_model(model)?)
                .with_cache_dir(models_dir.to_path_buf())
                .with_show_download_progress(true);
            TextEmbedding::try_new(options)
                .map_err(|e| anyhow!(HarnessError::model_resolution(model, e)))
        }
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let source = self.source.clone();
        let models_dir = self.models_dir.clone();
        let cache = Arc::clone(&self.cache);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let handle = cache.get_or_try_load(&model, || load_local_model(&model, &source, &models_dir))?;
            let mut embedder = handle
                .lock()
                .map_err(|_| anyhow!("embedding model '{}' is poisoned", model))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}
