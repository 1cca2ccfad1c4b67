//! Snapshot addressing within a hub cache

use crate::error::{LoaderError, LoaderResult};
use std::path::{Path, PathBuf};

/// Directory label under which commit snapshots live
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Directory holding revision → commit pointers
pub const REFS_DIR: &str = "refs";

/// Identifies one snapshot of one model, independent of the cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSnapshotRef {
    /// Cache folder name, e.g. `models--org--name`
    pub model_name: String,
    /// Always `snapshots` in the hub layout
    pub snapshot_label: String,
    pub commit_id: String,
}

impl ModelSnapshotRef {
    /// Derive the snapshot from a file resident directly in a snapshot dir
    ///
    /// `<root>/<model_name>/snapshots/<commit_id>/<file>`
    pub fn from_resident_path(path: &Path) -> LoaderResult<Self> {
        let layout_err = || LoaderError::SnapshotLayout(path.to_path_buf());

        let commit_dir = path.parent().ok_or_else(layout_err)?;
        let label_dir = commit_dir.parent().ok_or_else(layout_err)?;
        let model_dir = label_dir.parent().ok_or_else(layout_err)?;

        let name_of = |p: &Path| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(layout_err)
        };

        let snapshot_label = name_of(label_dir)?;
        if snapshot_label != SNAPSHOTS_DIR {
            return Err(layout_err());
        }

        Ok(Self {
            model_name: name_of(model_dir)?,
            snapshot_label,
            commit_id: name_of(commit_dir)?,
        })
    }

    /// `<root>/<model_name>`
    pub fn model_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.model_name)
    }

    /// `<root>/<model_name>/snapshots/<commit_id>`
    pub fn snapshot_dir(&self, root: &Path) -> PathBuf {
        self.model_dir(root)
            .join(&self.snapshot_label)
            .join(&self.commit_id)
    }

    /// `<root>/<model_name>/refs`
    pub fn refs_dir(&self, root: &Path) -> PathBuf {
        self.model_dir(root).join(REFS_DIR)
    }
}
