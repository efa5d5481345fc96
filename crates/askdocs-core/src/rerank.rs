//! Cross-encoder reranking of retrieved candidates.
//!
//! First-stage retrieval ranks by embedding distance, which compares the
//! query and a passage independently. A cross-encoder reads each
//! (query, passage) pair jointly and produces a sharper relevance score.
//! [`rerank`] scores every candidate, orders them by descending score, and
//! keeps the best `top_n`.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::SearchHit;

/// Scores (query, passage) pairs. Higher means more relevant.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    fn model_name(&self) -> &str;

    /// One score per passage, in passage order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// A search hit after cross-encoder scoring.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub hit: SearchHit,
    /// 0-based position in the first-stage result list.
    pub retrieval_rank: usize,
    pub score: f32,
}

/// Order `hits` by `scores` (descending) and keep the first `top_n`.
///
/// Equal scores keep first-stage order; NaN scores sort last.
pub fn order_by_score(hits: Vec<SearchHit>, scores: &[f32], top_n: usize) -> Result<Vec<RankedHit>> {
    if hits.len() != scores.len() {
        bail!(
            "cross-encoder returned {} scores for {} passages",
            scores.len(),
            hits.len()
        );
    }
    let mut ranked: Vec<RankedHit> = hits
        .into_iter()
        .zip(scores.iter().copied())
        .enumerate()
        .map(|(retrieval_rank, (hit, score))| RankedHit {
            hit,
            retrieval_rank,
            score,
        })
        .collect();
    ranked.sort_by(|a, b| descending(a.score, b.score));
    ranked.truncate(top_n);
    Ok(ranked)
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Score `hits` against `query` and return the `top_n` best.
///
/// The result holds `min(top_n, hits.len())` entries.
pub async fn rerank(
    encoder: &dyn CrossEncoder,
    query: &str,
    hits: Vec<SearchHit>,
    top_n: usize,
) -> Result<Vec<RankedHit>> {
    if hits.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }
    let passages: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
    let scores = encoder.score(query, &passages).await?;
    order_by_score(hits, &scores, top_n)
}
