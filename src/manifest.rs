//! Encryption manifest parsing
//!
//! An encrypted snapshot carries an `encryption-config.json` naming the key
//! broker, the key id and the encrypted files:
//!
//! ```json
//! {
//!   "broker_kind": "ITA_KBS",
//!   "broker_endpoint": "https://kbs.example",
//!   "key_id": "k1",
//!   "files": ["model.bin.aes", "config.json.aes"]
//! }
//! ```
//!
//! The older `kbs` / `kbs_url` field names are accepted as aliases.

use crate::crypto::output_file_name;
use crate::error::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Key broker named by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BrokerKind {
    /// Intel Trust Authority backed key broker service
    ItaKbs,
    /// Any literal without a built-in meaning
    Other(String),
}

impl BrokerKind {
    pub const ITA_KBS: &'static str = "ITA_KBS";

    pub fn as_str(&self) -> &str {
        match self {
            BrokerKind::ItaKbs => Self::ITA_KBS,
            BrokerKind::Other(kind) => kind,
        }
    }
}

impl From<String> for BrokerKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::ITA_KBS => BrokerKind::ItaKbs,
            _ => BrokerKind::Other(value),
        }
    }
}

impl From<BrokerKind> for String {
    fn from(kind: BrokerKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `encryption-config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionManifest {
    /// Which key broker releases the key
    #[serde(alias = "kbs")]
    pub broker_kind: BrokerKind,

    /// Base URL of the key broker
    #[serde(alias = "kbs_url")]
    pub broker_endpoint: Url,

    /// Key identifier at the broker
    pub key_id: String,

    /// Encrypted files, relative to the manifest's directory
    pub files: Vec<PathBuf>,
}

impl EncryptionManifest {
    /// Read and validate a manifest from disk
    pub async fn from_file(path: &Path) -> LoaderResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| LoaderError::ManifestRead {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        Self::parse(path, &content)
    }

    /// Parse and validate manifest content; `origin` is used in errors
    pub fn parse(origin: &Path, content: &str) -> LoaderResult<Self> {
        let manifest: Self = serde_json::from_str(content)
            .map_err(|e| LoaderError::manifest(origin, e.to_string()))?;
        manifest.validate(origin)?;
        Ok(manifest)
    }

    fn validate(&self, origin: &Path) -> LoaderResult<()> {
        if !matches!(self.broker_endpoint.scheme(), "http" | "https") {
            return Err(LoaderError::manifest(
                origin,
                format!("broker_endpoint must be http(s): {}", self.broker_endpoint),
            ));
        }

        if self.key_id.trim().is_empty() {
            return Err(LoaderError::manifest(origin, "key_id is empty"));
        }

        if self.files.is_empty() {
            return Err(LoaderError::manifest(origin, "files list is empty"));
        }

        let mut outputs = HashSet::new();
        for file in &self.files {
            let confined = !file.as_os_str().is_empty()
                && file.components().all(|c| matches!(c, Component::Normal(_)));
            if !confined {
                return Err(LoaderError::manifest(
                    origin,
                    format!("file entry escapes the snapshot: {}", file.display()),
                ));
            }

            let output = output_file_name(file).ok_or_else(|| {
                LoaderError::manifest(origin, format!("invalid file entry: {}", file.display()))
            })?;
            if !outputs.insert(output.clone()) {
                return Err(LoaderError::manifest(
                    origin,
                    format!("more than one entry decrypts to {}", output.to_string_lossy()),
                ));
            }
        }

        Ok(())
    }

    /// Absolute source paths for every entry, in manifest order
    pub fn source_paths(&self, manifest_dir: &Path) -> Vec<PathBuf> {
        self.files.iter().map(|f| manifest_dir.join(f)).collect()
    }
}
