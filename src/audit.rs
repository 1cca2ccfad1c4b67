//! Audit trail for key release and model preparation
//!
//! Appends JSON lines to `<state_dir>/cai-loader/audit.log` unless
//! `general.audit_log_path` points elsewhere. Key material never reaches
//! this log; only endpoints, key ids and paths do.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use url::Url;

pub const MODEL_UNENCRYPTED: &str = "model.unencrypted";
pub const KEY_RELEASED: &str = "key.released";
pub const MODEL_DECRYPTED: &str = "model.decrypted";
pub const MODEL_DECRYPT_FAILED: &str = "model.decrypt_failed";

/// File-based audit logger that appends JSON lines
#[derive(Debug, Clone)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: config
                .general
                .audit_log_path
                .clone()
                .unwrap_or_else(ConfigManager::audit_log_path),
        }
    }

    /// Logger writing to an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event.
    ///
    /// IO failures are logged and dropped; auditing never fails a prepare.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    pub async fn model_unencrypted(&self, model_id: &str) {
        self.log(MODEL_UNENCRYPTED, &json!({ "model_id": model_id }))
            .await;
    }

    pub async fn key_released(&self, model_id: &str, endpoint: &Url, key_id: &str) {
        self.log(
            KEY_RELEASED,
            &json!({
                "model_id": model_id,
                "endpoint": endpoint.as_str(),
                "key_id": key_id,
            }),
        )
        .await;
    }

    pub async fn model_decrypted(&self, model_id: &str, snapshot_dir: &Path, files: usize) {
        self.log(
            MODEL_DECRYPTED,
            &json!({
                "model_id": model_id,
                "snapshot_dir": snapshot_dir,
                "files": files,
            }),
        )
        .await;
    }

    pub async fn model_decrypt_failed(&self, model_id: &str, failed: &[&PathBuf]) {
        self.log(
            MODEL_DECRYPT_FAILED,
            &json!({
                "model_id": model_id,
                "failed": failed,
            }),
        )
        .await;
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
