//! Error types for cai-loader
//!
//! All modules use `LoaderResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// All errors that can occur while preparing a model
#[derive(Error, Debug)]
pub enum LoaderError {
    // Manifest errors
    #[error("Failed to read encryption manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid encryption manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Manifest is not inside a <model>/snapshots/<commit> directory: {0}")]
    SnapshotLayout(PathBuf),

    // Key broker errors
    #[error("Unsupported key broker: {0}")]
    UnsupportedBroker(String),

    #[error("Key broker {endpoint} unavailable: {reason}")]
    KeyBrokerUnavailable { endpoint: String, reason: String },

    #[error("Key broker {endpoint} refused to release key {key_id}: {reason}")]
    KeyBrokerRejected {
        endpoint: String,
        key_id: String,
        reason: String,
    },

    #[error("Key {key_id} not known to broker {endpoint}")]
    KeyNotFound { endpoint: String, key_id: String },

    #[error("Attestation failed: {0}")]
    Attestation(String),

    // Decryption errors
    #[error("{0}")]
    Decryption(DecryptionFailures),

    // Filesystem errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refs already present at {0}")]
    RefsExist(PathBuf),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Destination {destination} overlaps the source cache at {source_dir}")]
    DestinationInSource {
        destination: PathBuf,
        source_dir: PathBuf,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with code {code}: {command}")]
    CommandExit { command: String, code: i32 },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl LoaderError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a manifest validation error
    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyBrokerUnavailable { .. })
    }

    /// Whether the failure happened while obtaining the key
    pub fn is_key_broker(&self) -> bool {
        matches!(
            self,
            Self::KeyBrokerUnavailable { .. }
                | Self::KeyBrokerRejected { .. }
                | Self::KeyNotFound { .. }
                | Self::Attestation(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedBroker(_) => Some("Supported key brokers: ITA_KBS"),
            Self::KeyBrokerRejected { .. } => {
                Some("Check that this environment's attestation policy allows the key")
            }
            Self::Attestation(_) => {
                Some("Set broker.attestation_helper in the config to an attestation helper program")
            }
            Self::RefsExist(_) => Some("Remove the destination refs directory and retry"),
            Self::DestinationInSource { .. } => {
                Some("Point --hub at a directory outside the source cache")
            }
            _ => None,
        }
    }
}

/// Why a single file failed to decrypt
#[derive(Error, Debug)]
pub enum DecryptErrorKind {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("ciphertext too short ({0} bytes)")]
    Truncated(usize),

    #[error("authentication tag mismatch (corrupt ciphertext or wrong key)")]
    Authentication,

    #[error("unsupported key length {0}, expected 16 or 32 bytes")]
    InvalidKeyLength(usize),

    #[error("output already exists: {0}")]
    OutputExists(PathBuf),

    #[error("decryption worker failed: {0}")]
    Worker(String),
}

/// A single file's decryption failure
#[derive(Error, Debug)]
#[error("{path}: {kind}")]
pub struct FileDecryptionError {
    pub path: PathBuf,
    #[source]
    pub kind: DecryptErrorKind,
}

/// Every failure collected from one decryption batch
#[derive(Debug, Default)]
pub struct DecryptionFailures(pub Vec<FileDecryptionError>);

impl DecryptionFailures {
    /// Paths of the files that failed, in manifest order
    pub fn paths(&self) -> Vec<&PathBuf> {
        self.0.iter().map(|f| &f.path).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DecryptionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to decrypt {} file(s)", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n  {}", failure)?;
        }
        Ok(())
    }
}

impl From<DecryptionFailures> for LoaderError {
    fn from(failures: DecryptionFailures) -> Self {
        Self::Decryption(failures)
    }
}
