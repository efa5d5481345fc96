//! Typed failure classes shared by the core and the application crate.
//!
//! Most fallible operations return [`anyhow::Result`]; the variants here are
//! the failures a front end needs to tell apart. They travel inside an
//! `anyhow::Error` and can be recovered with `downcast_ref::<HarnessError>()`.
//!
//! Two further classes never surface as errors: an empty corpus is reported
//! through the ingest report, and a failed query becomes a degraded
//! [`QueryResult`](crate::models::QueryResult).

/// Classified failures of the askdocs pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An embedding, reranker, or language model could not be resolved
    /// locally or remotely. Never retried.
    #[error("model '{model}' could not be resolved: {reason}")]
    ModelResolution { model: String, reason: String },

    /// A rebuild was requested while the store was in use.
    #[error("store at {0} is in use; rebuild rejected")]
    RebuildConflict(String),
}

impl HarnessError {
    pub fn model_resolution(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HarnessError::ModelResolution {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}
