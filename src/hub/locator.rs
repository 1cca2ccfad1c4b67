//! Encryption manifest discovery in the hub cache

use super::snapshot::{REFS_DIR, SNAPSHOTS_DIR};
use crate::error::{LoaderError, LoaderResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Name of the manifest file that marks a snapshot as encrypted
pub const MANIFEST_FILE: &str = "encryption-config.json";

/// Marker directory the hub client uses for files known to be absent
const NO_EXIST_DIR: &str = ".no_exist";

/// Finds the encryption manifest for a model's resolved snapshot
#[derive(Debug, Clone)]
pub struct ManifestLocator {
    cache_root: PathBuf,
    revision: String,
}

impl ManifestLocator {
    pub fn new(cache_root: impl Into<PathBuf>, revision: impl Into<String>) -> Self {
        Self {
            cache_root: cache_root.into(),
            revision: revision.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache folder for a model id: `acme/llm` → `models--acme--llm`
    pub fn model_folder(model_id: &str) -> String {
        let mut folder = String::from("models");
        for part in model_id.split('/') {
            folder.push_str("--");
            folder.push_str(part);
        }
        folder
    }

    /// Locate the manifest, returning `None` when the model is not encrypted
    /// or not present in the cache.
    pub async fn locate(&self, model_id: &str) -> LoaderResult<Option<PathBuf>> {
        let model_dir = self.cache_root.join(Self::model_folder(model_id));
        if !model_dir.is_dir() {
            debug!("{} not in cache at {}", model_id, model_dir.display());
            return Ok(None);
        }

        let Some(commit) = self.resolve_commit(&model_dir).await? else {
            debug!("Revision {} not resolvable for {}", self.revision, model_id);
            return Ok(None);
        };

        let candidate = model_dir
            .join(SNAPSHOTS_DIR)
            .join(&commit)
            .join(MANIFEST_FILE);
        if candidate.is_file() {
            debug!("Found manifest at {}", candidate.display());
            return Ok(Some(candidate));
        }

        if model_dir
            .join(NO_EXIST_DIR)
            .join(&commit)
            .join(MANIFEST_FILE)
            .exists()
        {
            debug!("Manifest recorded as absent for commit {}", commit);
        }

        Ok(None)
    }

    /// Snapshot directory the revision currently points at, if any
    pub async fn snapshot_dir(&self, model_id: &str) -> LoaderResult<Option<PathBuf>> {
        let model_dir = self.cache_root.join(Self::model_folder(model_id));
        if !model_dir.is_dir() {
            return Ok(None);
        }
        Ok(self
            .resolve_commit(&model_dir)
            .await?
            .map(|commit| model_dir.join(SNAPSHOTS_DIR).join(commit)))
    }

    /// Map the configured revision to a commit id via `refs/<revision>`
    async fn resolve_commit(&self, model_dir: &Path) -> LoaderResult<Option<String>> {
        let ref_path = model_dir.join(REFS_DIR).join(&self.revision);
        if ref_path.is_file() {
            let content = fs::read_to_string(&ref_path).await.map_err(|e| {
                LoaderError::io(format!("reading ref {}", ref_path.display()), e)
            })?;
            let commit = content.trim();
            return Ok((!commit.is_empty()).then(|| commit.to_string()));
        }

        if is_commit_hash(&self.revision) {
            return Ok(Some(self.revision.clone()));
        }

        Ok(None)
    }
}

fn is_commit_hash(revision: &str) -> bool {
    revision.len() == 40 && revision.bytes().all(|b| b.is_ascii_hexdigit())
}
