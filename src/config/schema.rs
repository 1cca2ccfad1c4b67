//! Configuration schema for cai-loader
//!
//! Configuration is stored at `~/.config/cai-loader/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Source hub cache settings
    pub cache: CacheConfig,

    /// Key broker settings
    pub broker: BrokerConfig,

    /// Bulk decryption settings
    pub decrypt: DecryptConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,

    /// Audit log location (defaults to the state directory)
    pub audit_log_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
            audit_log_path: None,
        }
    }
}

/// Source hub cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hub cache to read models from (defaults to `~/.cache/huggingface/hub`)
    pub source_dir: Option<PathBuf>,

    /// Revision to resolve through `refs/`
    pub revision: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            revision: "main".to_string(),
        }
    }
}

impl CacheConfig {
    /// Source cache directory, falling back to the hub default
    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(default_hub_cache)
    }
}

/// Default hub cache location
pub fn default_hub_cache() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("huggingface")
        .join("hub")
}

/// Key broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-attempt timeout for a key request
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    pub max_retries: u32,

    /// Initial backoff between retries, doubled on each attempt
    pub backoff_ms: u64,

    /// Program that produces attestation tokens and unwraps released keys
    pub attestation_helper: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
            attestation_helper: None,
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Bulk decryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Upper bound on parallel workers (applied after the CPU-based limit)
    pub max_workers: Option<usize>,

    /// Overwrite existing decrypted files
    pub overwrite: bool,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            overwrite: true,
        }
    }
}
