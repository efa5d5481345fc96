//! Cross-encoder reranker backed by fastembed's `TextRerank`.
//!
//! The model is loaded lazily on the first scoring call and kept in a
//! shared cache, like the local embedding models. Scoring runs on the
//! tokio blocking pool.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use askdocs_core::rerank::CrossEncoder;
use askdocs_core::HarnessError;
#[cfg(feature = "local-models")]
use async_trait::async_trait;

use crate::config::Config;

/// Cache of loaded reranker models.
#[cfg(feature = "local-models")]
pub type RerankerCache = crate::model_cache::ModelCache<fastembed::TextRerank>;

#[cfg(not(feature = "local-models"))]
pub type RerankerCache = crate::model_cache::ModelCache<()>;

/// Reranker model identifiers accepted in `reranker.model`.
pub const SUPPORTED_RERANKERS: [&str; 4] = [
    "bge-reranker-base",
    "bge-reranker-v2-m3",
    "jina-reranker-v1-turbo-en",
    "jina-reranker-v2-base-multilingual",
];

/// Build the reranker when reranking is enabled.
///
/// Returns `Ok(None)` when `retrieval.enable_rerank` is false.
///
/// # Errors
///
/// [`HarnessError::ModelResolution`] for an unknown model name or a build
/// without local model support.
pub fn create_reranker(
    config: &Config,
    cache: &Arc<RerankerCache>,
) -> Result<Option<Arc<dyn CrossEncoder>>> {
    if !config.retrieval.enable_rerank {
        return Ok(None);
    }
    let model = config.reranker.model.as_str();
    if !SUPPORTED_RERANKERS.contains(&model) {
        return Err(anyhow!(HarnessError::model_resolution(
            model,
            format!("unknown reranker; supported: {}", SUPPORTED_RERANKERS.join(", "))
        )));
    }

    #[cfg(feature = "local-models")]
    {
        Ok(Some(Arc::new(FastembedReranker {
            model: model.to_string(),
            models_dir: config.paths.models_dir.clone(),
            cache: Arc::clone(cache),
        })))
    }
    #[cfg(not(feature = "local-models"))]
    {
        let _ = cache;
        Err(anyhow!(HarnessError::model_resolution(
            model,
            "askdocs was built without the `local-models` feature; set retrieval.enable_rerank = false"
        )))
    }
}

#[cfg(feature = "local-models")]
fn reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
    use fastembed::RerankerModel;
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        "jina-reranker-v2-base-multilingual" => Ok(RerankerModel::JINARerankerV2BaseMultiligual),
        other => Err(anyhow!(HarnessError::model_resolution(other, "unknown reranker"))),
    }
}

#[cfg(feature = "local-models")]
pub struct FastembedReranker {
    model: String,
    models_dir: std::path::PathBuf,
    cache: Arc<RerankerCache>,
}

#[cfg(feature = "local-models")]
fn load_reranker(model: &str, models_dir: &std::path::Path) -> Result<fastembed::TextRerank> {
    tracing::info!(model, cache = %models_dir.display(), "loading reranker model");
    let options = fastembed::RerankInitOptions::new(reranker_model(model)?)
        .with_cache_dir(models_dir.to_path_buf())
        .with_show_download_progress(true);
    fastembed::TextRerank::try_new(options).map_err(|e| anyhow!(HarnessError::model_resolution(model, e)))
}

/// Put fastembed's (index, score) results back into passage order.
pub fn scores_in_passage_order(len: usize, results: impl IntoIterator<Item = (usize, f32)>) -> Result<Vec<f32>> {
    let mut scores = vec![None; len];
    for (index, score) in results {
        let slot = scores
            .get_mut(index)
            .ok_or_else(|| anyhow!("reranker returned index {} for {} passages", index, len))?;
        *slot = Some(score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow!("reranker returned no score for passage {}", i)))
        .collect()
}

#[cfg(feature = "local-models")]
#[async_trait]
impl CrossEncoder for FastembedReranker {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let models_dir = self.models_dir.clone();
        let cache = Arc::clone(&self.cache);
        let query = query.to_string();
        let passages = passages.to_vec();

        tokio::task::spawn_blocking(move || {
            let handle = cache.get_or_try_load(&model, || load_reranker(&model, &models_dir))?;
            let mut reranker = handle
                .lock()
                .map_err(|_| anyhow!("reranker '{}' is poisoned", model))?;
            let len = passages.len();
            let refs: Vec<&str> = passages.iter().map(String::as_str).collect();
            let results = reranker
                .rerank(query.as_str(), refs, false, None)
                .map_err(|e| anyhow!("Reranking failed: {}", e))?;
            scores_in_passage_order(len, results.into_iter().map(|r| (r.index, r.score)))
        })
        .await?
    }
}
