//! Destination tree placement
//!
//! Mirrors a snapshot's directory and its `refs` pointers into the
//! destination root ahead of decryption.

use crate::error::{LoaderError, LoaderResult};
use crate::hub::{ModelSnapshotRef, REFS_DIR};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Create `<root>/<model_name>/snapshots/<commit_id>` if absent
pub async fn ensure_snapshot_dir(
    destination_root: &Path,
    snapshot: &ModelSnapshotRef,
) -> LoaderResult<PathBuf> {
    let dir = snapshot.snapshot_dir(destination_root);
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| LoaderError::io(format!("creating snapshot dir {}", dir.display()), e))?;
    Ok(dir)
}

/// Copy the `refs` subtree verbatim to `<root>/<model_name>/refs`.
///
/// Fails with `RefsExist` when the destination already has refs.
pub async fn copy_refs(
    source_refs_dir: &Path,
    destination_root: &Path,
    model_name: &str,
) -> LoaderResult<PathBuf> {
    let target = destination_root.join(model_name).join(REFS_DIR);
    if target.exists() {
        return Err(LoaderError::RefsExist(target));
    }
    if !source_refs_dir.is_dir() {
        return Err(LoaderError::PathNotFound(source_refs_dir.to_path_buf()));
    }

    copy_tree(source_refs_dir, &target).await?;
    debug!(
        "Copied refs {} -> {}",
        source_refs_dir.display(),
        target.display()
    );
    Ok(target)
}

/// Fail with `DestinationInSource` when either path contains the other.
///
/// Both sides are compared after resolving symlinks, so a destination that
/// reaches the source through a link is caught too.
pub async fn ensure_disjoint(source_dir: &Path, destination: &Path) -> LoaderResult<()> {
    let source = canonical(source_dir).await;
    let dest = canonical(destination).await;
    if dest.starts_with(&source) || source.starts_with(&dest) {
        return Err(LoaderError::DestinationInSource {
            destination: destination.to_path_buf(),
            source_dir: source_dir.to_path_buf(),
        });
    }
    Ok(())
}

/// Canonical form of `path`, resolved through its deepest existing ancestor
async fn canonical(path: &Path) -> PathBuf {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    for ancestor in path.ancestors() {
        if let Ok(resolved) = fs::canonicalize(ancestor).await {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => resolved.join(rest),
                _ => resolved,
            };
        }
    }
    path
}

/// Replace any existing destination refs with a fresh copy.
///
/// Refuses to touch a target that overlaps `source_refs_dir`.
pub async fn replace_refs(
    source_refs_dir: &Path,
    destination_root: &Path,
    model_name: &str,
) -> LoaderResult<PathBuf> {
    let target = destination_root.join(model_name).join(REFS_DIR);
    ensure_disjoint(source_refs_dir, &target).await?;
    if target.exists() {
        debug!("Replacing existing refs at {}", target.display());
        fs::remove_dir_all(&target)
            .await
            .map_err(|e| LoaderError::io(format!("removing refs {}", target.display()), e))?;
    }
    copy_refs(source_refs_dir, destination_root, model_name).await
}

/// Recursive copy without following directory symlinks
async fn copy_tree(from: &Path, to: &Path) -> LoaderResult<()> {
    let mut stack = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((src, dst)) = stack.pop() {
        fs::create_dir_all(&dst)
            .await
            .map_err(|e| LoaderError::io(format!("creating {}", dst.display()), e))?;

        let mut entries = fs::read_dir(&src)
            .await
            .map_err(|e| LoaderError::io(format!("reading {}", src.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LoaderError::io(format!("reading entry in {}", src.display()), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| LoaderError::io("reading file type", e))?;
            let target = dst.join(entry.file_name());

            if file_type.is_dir() {
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await.map_err(|e| {
                    LoaderError::io(format!("copying {}", entry.path().display()), e)
                })?;
            }
        }
    }

    Ok(())
}
