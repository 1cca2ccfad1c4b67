//! Hub cache layout: manifest discovery and snapshot addressing

mod locator;
mod snapshot;

pub use locator::{ManifestLocator, MANIFEST_FILE};
pub use snapshot::{ModelSnapshotRef, REFS_DIR, SNAPSHOTS_DIR};
