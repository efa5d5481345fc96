//! The caller-facing facade: ingest, rebuild, query and clear memory.
//!
//! A [`Harness`] owns one persisted store (`persist_dir`) and one
//! conversation session. Queries share the store through a read lock;
//! [`Harness::rebuild`] needs the write lock and is rejected with
//! [`HarnessError::RebuildConflict`] instead of waiting when the store is
//! in use.
//!
//! A rebuild writes a staging database next to the live one and only moves
//! it into place once ingestion has finished. A failed rebuild leaves the
//! previous store untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use askdocs_core::embedding::EmbeddingProvider;
use askdocs_core::llm::LanguageModel;
use askdocs_core::models::{ConversationTurn, QueryResult};
use askdocs_core::rerank::CrossEncoder;
use askdocs_core::retriever::ConversationalRetriever;
use askdocs_core::store::VectorStore;
use askdocs_core::HarnessError;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{create_embedder, LocalModelCache};
use crate::ingest::{ingest, IngestReport};
use crate::llm::OpenAiCompatibleChat;
use crate::progress::IngestProgressReporter;
use crate::rerank::{create_reranker, RerankerCache};
use crate::sqlite_store::{SqliteVectorStore, META_BUILT_AT};
use crate::stats::{self, StoreStats};

/// The model-backed capabilities a harness runs on.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub reranker: Option<Arc<dyn CrossEncoder>>,
}

impl Capabilities {
    /// Build the capabilities named in `config`. Local models are not
    /// loaded until first use.
    pub fn from_config(
        config: &Config,
        embedders: &Arc<LocalModelCache>,
        rerankers: &Arc<RerankerCache>,
    ) -> Result<Self> {
        Ok(Self {
            embedder: create_embedder(&config.embedding, &config.paths.models_dir, embedders)?,
            llm: Arc::new(OpenAiCompatibleChat::new(&config.llm)?),
            reranker: create_reranker(config, rerankers)?,
        })
    }
}

pub struct Harness {
    config: Config,
    store: RwLock<SqliteVectorStore>,
    retriever: ConversationalRetriever,
}

impl Harness {
    /// Open the harness with capabilities built from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let caps = Capabilities::from_config(
            &config,
            &Arc::new(LocalModelCache::new()),
            &Arc::new(RerankerCache::new()),
        )?;
        Self::with_capabilities(config, caps).await
    }

    /// Open the harness with injected capabilities.
    ///
    /// Missing `docs_dir` and `persist_dir` are created. An existing store
    /// is loaded as-is; it is not rebuilt.
    pub async fn with_capabilities(config: Config, caps: Capabilities) -> Result<Self> {
        ensure_dir(&config.paths.docs_dir, "paths.docs_dir")?;
        ensure_dir(&config.paths.persist_dir, "paths.persist_dir")?;

        let store = SqliteVectorStore::open(&config.db_path()).await?;
        if let Some((model, dims)) = store.model_info().await? {
            if model != caps.embedder.model_name() || dims != caps.embedder.dims() {
                warn!(
                    stored_model = %model,
                    stored_dims = dims,
                    model = caps.embedder.model_name(),
                    dims = caps.embedder.dims(),
                    "store was built with a different embedding model; run `askdocs ingest` to rebuild"
                );
            }
        }

        let retriever = ConversationalRetriever::new(
            caps.embedder,
            caps.llm,
            caps.reranker,
            config.retriever_settings(),
        );
        Ok(Self {
            config,
            store: RwLock::new(store),
            retriever,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the store if it holds no records yet, or if its last build
    /// never finished. Returns `None` when an existing store was kept.
    pub async fn ensure_built(
        &self,
        progress: &dyn IngestProgressReporter,
    ) -> Result<Option<IngestReport>> {
        let complete = {
            let store = self.store.read().await;
            !store.is_empty().await? && store.get_meta(META_BUILT_AT).await?.is_some()
        };
        if complete {
            return Ok(None);
        }
        self.rebuild(progress).await.map(Some)
    }

    /// Re-derive the persisted store from `docs_dir`.
    ///
    /// The new store is ingested into a staging file and swapped in only
    /// on success; on failure the staging file is deleted and the previous
    /// store stays in service.
    ///
    /// # Errors
    ///
    /// [`HarnessError::RebuildConflict`] when a query or another rebuild
    /// holds the store. Ingestion errors are returned as-is.
    pub async fn rebuild(&self, progress: &dyn IngestProgressReporter) -> Result<IngestReport> {
        let db_path = self.config.db_path();
        let mut store = match self.store.try_write() {
            Ok(guard) => guard,
            Err(_) => bail!(HarnessError::RebuildConflict(
                self.config.paths.persist_dir.display().to_string()
            )),
        };

        let staging_path = staging_path(&db_path);
        remove_store_files(&staging_path)?;
        info!(db = %db_path.display(), staging = %staging_path.display(), "rebuilding store");

        let staging = SqliteVectorStore::open(&staging_path).await?;
        let built = async {
            let report = ingest(
                &self.config,
                self.retriever.embedder().as_ref(),
                &staging,
                progress,
            )
            .await?;
            staging.checkpoint().await?;
            Ok::<_, anyhow::Error>(report)
        }
        .await;
        staging.close().await;

        let report = match built {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "rebuild failed; keeping the previous store");
                if let Err(cleanup) = remove_store_files(&staging_path) {
                    warn!(error = %cleanup, "could not remove staging store");
                }
                return Err(e);
            }
        };

        store.close().await;
        let promoted = promote_staging(&staging_path, &db_path);
        *store = SqliteVectorStore::open(&db_path).await?;
        promoted?;
        Ok(report)
    }

    /// Answer `question`. Never fails; see [`QueryResult::outcome`].
    pub async fn query(&self, question: &str) -> QueryResult {
        let store = self.store.read().await;
        self.retriever.query(&*store, question).await
    }

    pub fn clear_memory(&self) {
        self.retriever.clear_memory();
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.retriever.history()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let store = self.store.read().await;
        stats::collect(&store).await
    }

    pub async fn close(&self) {
        self.store.read().await.close().await;
    }
}

fn ensure_dir(dir: &Path, key: &str) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    warn!(
        "{}; creating it",
        HarnessError::Configuration(format!("{} {} does not exist", key, dir.display()))
    );
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

fn staging_path(db_path: &Path) -> PathBuf {
    with_suffix(db_path, ".staging")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    name.into()
}

/// Move a closed, checkpointed staging database over `db_path`.
fn promote_staging(staging: &Path, db_path: &Path) -> Result<()> {
    remove_files(&[with_suffix(db_path, "-wal"), with_suffix(db_path, "-shm")])?;
    std::fs::rename(staging, db_path).with_context(|| {
        format!("Failed to move {} to {}", staging.display(), db_path.display())
    })?;
    remove_files(&[with_suffix(staging, "-wal"), with_suffix(staging, "-shm")])
}

/// Remove the database file and its WAL side files.
fn remove_store_files(db_path: &Path) -> Result<()> {
    remove_files(&[
        db_path.to_path_buf(),
        with_suffix(db_path, "-wal"),
        with_suffix(db_path, "-shm"),
    ])
}

fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn removing_missing_store_files_is_ok() {
        let tmp = TempDir::new().unwrap();
        remove_store_files(&tmp.path().join("askdocs.sqlite")).unwrap();
    }

    #[test]
    fn removes_database_and_side_files() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("askdocs.sqlite");
        for name in ["askdocs.sqlite", "askdocs.sqlite-wal", "askdocs.sqlite-shm", "keep.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        remove_store_files(&db).unwrap();
        let left: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec!["keep.txt".to_string()]);
    }

    #[test]
    fn staging_replaces_database_and_drops_side_files() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("askdocs.sqlite");
        let staging = staging_path(&db);
        assert!(staging.ends_with("askdocs.sqlite.staging"));
        std::fs::write(&db, b"old").unwrap();
        std::fs::write(with_suffix(&db, "-wal"), b"old wal").unwrap();
        std::fs::write(&staging, b"new").unwrap();
        std::fs::write(with_suffix(&staging, "-shm"), b"x").unwrap();

        promote_staging(&staging, &db).unwrap();
        assert_eq!(std::fs::read(&db).unwrap(), b"new");
        let mut left: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["askdocs.sqlite".to_string()]);
    }

    #[test]
    fn missing_directories_are_created() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a/b");
        ensure_dir(&dir, "paths.docs_dir").unwrap();
        assert!(dir.is_dir());
    }
}
