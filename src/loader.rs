//! Document loader: walks the corpus directory and extracts documents.
//!
//! Files are selected with include/exclude glob patterns (relative to the
//! corpus root), read, and passed through [`extract`](crate::extract). A PDF
//! yields one [`Document`] per non-empty page; other formats yield one
//! document per file.
//!
//! Loading never fails because of an individual file: unreadable or
//! unparsable files are logged, counted in [`LoadOutcome::failed`], and
//! skipped. A missing root directory produces an empty outcome and a
//! warning.

use std::path::{Path, PathBuf};

use anyhow::Result;
use askdocs_core::models::Document;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::extract::{content_type_for, extract_pages};

/// Directories never descended into.
const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Result of one loader pass.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    /// Files that matched the include patterns.
    pub files_seen: usize,
    /// Files that could not be read or extracted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

pub struct DocumentLoader {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl DocumentLoader {
    /// Build a loader for `root`.
    ///
    /// # Errors
    ///
    /// Fails if a glob pattern is invalid.
    pub fn new(root: impl Into<PathBuf>, config: &LoaderConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            root: root.into(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every matching file under the root, in path order.
    pub fn load(&self) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();
        if !self.root.is_dir() {
            warn!(dir = %self.root.display(), "documents directory does not exist; nothing to load");
            return outcome;
        }

        for path in self.matching_files(&mut outcome) {
            outcome.files_seen += 1;
            match load_file(&path) {
                Ok(docs) => {
                    debug!(file = %path.display(), documents = docs.len(), "loaded");
                    outcome.documents.extend(docs);
                }
                Err(reason) => {
                    warn!(file = %path.display(), error = %reason, "skipping file");
                    outcome.failed.push((path, reason));
                }
            }
        }
        outcome
    }

    fn matching_files(&self, outcome: &mut LoadOutcome) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    warn!(path = %path.display(), error = %e, "cannot read directory entry");
                    outcome.failed.push((path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if self.exclude.is_match(rel_str.as_ref()) || !self.include.is_match(rel_str.as_ref()) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        files
    }
}

fn load_file(path: &Path) -> Result<Vec<Document>, String> {
    let content_type = content_type_for(path)
        .ok_or_else(|| format!("no extractor for {}", path.display()))?;
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let pages = extract_pages(&bytes, content_type).map_err(|e| e.to_string())?;
    let source = path.to_string_lossy().to_string();
    Ok(pages
        .into_iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| Document::new(source.clone(), p.page, content_type, p.text))
        .collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
