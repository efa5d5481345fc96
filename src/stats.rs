//! Store statistics for `askdocs stats`.

use anyhow::Result;
use askdocs_core::store::VectorStore;
use serde::Serialize;

use crate::sqlite_store::{SqliteVectorStore, META_BUILT_AT};

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub database: String,
    pub size_bytes: u64,
    pub documents: usize,
    pub records: usize,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub built_at: Option<String>,
}

pub async fn collect(store: &SqliteVectorStore) -> Result<StoreStats> {
    let model_info = store.model_info().await?;
    Ok(StoreStats {
        database: store.path().display().to_string(),
        size_bytes: std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0),
        documents: store.document_count().await?,
        records: store.count().await?,
        model: model_info.as_ref().map(|(m, _)| m.clone()),
        dims: model_info.map(|(_, d)| d),
        built_at: store.get_meta(META_BUILT_AT).await?,
    })
}

/// Print `stats` as `key: value` lines.
pub fn print(stats: &StoreStats) {
    println!("askdocs store");
    println!("  database:  {}", stats.database);
    println!("  size:      {}", format_bytes(stats.size_bytes));
    println!("  documents: {}", stats.documents);
    println!("  records:   {}", stats.records);
    match (&stats.model, stats.dims) {
        (Some(model), Some(dims)) => println!("  model:     {} ({} dims)", model, dims),
        _ => println!("  model:     none (store never built)"),
    }
    if let Some(built_at) = &stats.built_at {
        println!("  built at:  {}", built_at);
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
