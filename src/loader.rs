//! Model preparation pipeline
//!
//! `prepare` turns a cached model into something a runtime can load from a
//! local hub directory. Unencrypted models are left where they are; encrypted
//! ones are decrypted into a mirror of the cache layout under the destination
//! root. Everything that can be checked without side effects (manifest,
//! broker kind, key release) happens before the destination is touched.

use crate::audit::AuditLog;
use crate::config::schema::Config;
use crate::decrypt::{BulkDecryptor, ProgressFn};
use crate::error::{LoaderError, LoaderResult};
use crate::hub::{ManifestLocator, ModelSnapshotRef};
use crate::keybroker::BrokerRegistry;
use crate::manifest::EncryptionManifest;
use crate::placement;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Called once per `prepare` with the manifest path, the parsed manifest and
/// the worker count, before the key is requested
pub type ManifestFn = Arc<dyn Fn(&Path, &EncryptionManifest, usize) + Send + Sync>;

/// Result of a successful `prepare`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// No manifest; the source cache can be used as-is
    Unencrypted {
        /// Snapshot the configured revision points at, if cached
        source_snapshot: Option<PathBuf>,
    },
    /// Files decrypted into the destination snapshot
    Decrypted {
        snapshot: ModelSnapshotRef,
        snapshot_dir: PathBuf,
        /// Written plaintext files in manifest order
        files: Vec<PathBuf>,
    },
}

impl PrepareOutcome {
    pub fn is_decrypted(&self) -> bool {
        matches!(self, Self::Decrypted { .. })
    }
}

/// Makes a model available under a local hub directory
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn prepare(&self, model_id: &str, destination: &Path) -> LoaderResult<PrepareOutcome>;
}

/// Loader for models held in a hub-layout cache
pub struct HubLoader {
    locator: ManifestLocator,
    registry: BrokerRegistry,
    decryptor: BulkDecryptor,
    audit: Option<AuditLog>,
    on_manifest: Option<ManifestFn>,
}

impl HubLoader {
    pub fn new(locator: ManifestLocator, registry: BrokerRegistry, decryptor: BulkDecryptor) -> Self {
        Self {
            locator,
            registry,
            decryptor,
            audit: None,
            on_manifest: None,
        }
    }

    /// Loader wired from configuration with the built-in brokers.
    ///
    /// `source_cache` overrides `cache.source_dir`.
    pub fn from_config(config: &Config, source_cache: Option<PathBuf>) -> Self {
        let cache_root = source_cache.unwrap_or_else(|| config.cache.source_dir());
        Self::new(
            ManifestLocator::new(cache_root, config.cache.revision.clone()),
            BrokerRegistry::with_defaults(&config.broker),
            BulkDecryptor::new(&config.decrypt),
        )
        .with_audit(AuditLog::new(config))
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Report each decrypted file to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.decryptor = self.decryptor.with_progress(progress);
        self
    }

    /// Report the manifest of an encrypted model to `observer`
    pub fn with_manifest_observer(mut self, observer: ManifestFn) -> Self {
        self.on_manifest = Some(observer);
        self
    }

    pub fn locator(&self) -> &ManifestLocator {
        &self.locator
    }

    pub fn registry(&self) -> &BrokerRegistry {
        &self.registry
    }

    pub fn decryptor(&self) -> &BulkDecryptor {
        &self.decryptor
    }

    /// Locate and parse the manifest without contacting the broker
    pub async fn inspect(
        &self,
        model_id: &str,
    ) -> LoaderResult<Option<(PathBuf, EncryptionManifest)>> {
        let Some(path) = self.locator.locate(model_id).await? else {
            return Ok(None);
        };
        let manifest = EncryptionManifest::from_file(&path).await?;
        Ok(Some((path, manifest)))
    }
}

#[async_trait]
impl ModelLoader for HubLoader {
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    async fn prepare(&self, model_id: &str, destination: &Path) -> LoaderResult<PrepareOutcome> {
        let Some(manifest_path) = self.locator.locate(model_id).await? else {
            warn!(
                "{} is not encrypted, load it from {} directly",
                model_id,
                self.locator.cache_root().display()
            );
            if let Some(audit) = &self.audit {
                audit.model_unencrypted(model_id).await;
            }
            let source_snapshot = self.locator.snapshot_dir(model_id).await?;
            return Ok(PrepareOutcome::Unencrypted { source_snapshot });
        };

        let snapshot = ModelSnapshotRef::from_resident_path(&manifest_path)?;
        let manifest = EncryptionManifest::from_file(&manifest_path).await?;
        let broker = self.registry.resolve(&manifest.broker_kind)?;
        placement::ensure_disjoint(
            &snapshot.model_dir(self.locator.cache_root()),
            &snapshot.model_dir(destination),
        )
        .await?;
        if let Some(observer) = &self.on_manifest {
            observer(
                &manifest_path,
                &manifest,
                self.decryptor.worker_count(manifest.files.len()),
            );
        }

        info!(
            "Requesting key {} from {} ({})",
            manifest.key_id,
            manifest.broker_endpoint,
            broker.broker_name()
        );
        let key = broker
            .get_key(&manifest.broker_endpoint, &manifest.key_id)
            .await?;
        if let Some(audit) = &self.audit {
            audit
                .key_released(model_id, &manifest.broker_endpoint, &manifest.key_id)
                .await;
        }

        let source_refs = snapshot.refs_dir(self.locator.cache_root());
        if source_refs.is_dir() {
            placement::replace_refs(&source_refs, destination, &snapshot.model_name).await?;
        } else {
            // Pinned to a commit hash; there are no refs to mirror
            warn!("No refs at {}, skipping refs copy", source_refs.display());
        }
        let snapshot_dir = placement::ensure_snapshot_dir(destination, &snapshot).await?;

        let manifest_dir = manifest_path
            .parent()
            .ok_or_else(|| LoaderError::SnapshotLayout(manifest_path.clone()))?;
        let inputs = manifest.source_paths(manifest_dir);

        match self
            .decryptor
            .decrypt_all(key, &inputs, &snapshot_dir)
            .await
        {
            Ok(files) => {
                info!("Decrypted {} file(s) into {}", files.len(), snapshot_dir.display());
                if let Some(audit) = &self.audit {
                    audit
                        .model_decrypted(model_id, &snapshot_dir, files.len())
                        .await;
                }
                Ok(PrepareOutcome::Decrypted {
                    snapshot,
                    snapshot_dir,
                    files,
                })
            }
            Err(failures) => {
                if let Some(audit) = &self.audit {
                    audit.model_decrypt_failed(model_id, &failures.paths()).await;
                }
                Err(failures.into())
            }
        }
    }
}
