//! Attestation capability used by attestation-backed brokers
//!
//! Collecting evidence and holding the key-wrapping private key belong to the
//! trust environment, not to this crate. `CommandAttester` delegates both to
//! a helper program:
//!
//! - `<helper> token <key_id>` prints an attestation token on stdout
//! - `<helper> unwrap` reads the broker's wrapped-key JSON on stdin and
//!   prints the base64 key on stdout

use crate::crypto::DecryptionKey;
use crate::error::{LoaderError, LoaderResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

/// Key material as released by the broker, still wrapped for this environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Base64 key encrypted under the symmetric wrapping key
    pub wrapped_key: String,
    /// Base64 symmetric wrapping key encrypted to the attested public key
    pub wrapped_swk: String,
}

/// Proves this environment to a broker and unwraps what it releases
#[async_trait]
pub trait Attester: Send + Sync {
    /// Token to present when requesting `key_id`
    async fn attestation_token(&self, key_id: &str) -> LoaderResult<String>;

    /// Recover the key from the broker's transfer response
    async fn unwrap_key(&self, wrapped: &WrappedKey) -> LoaderResult<DecryptionKey>;
}

/// Attester backed by an external helper program
#[derive(Debug, Clone)]
pub struct CommandAttester {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl CommandAttester {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the action (e.g. a wrapper's own flags)
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        // A cancelled attempt (retry timeout) must not leave the helper running
        cmd.kill_on_drop(true);
        cmd
    }

    fn display_name(&self, action: &str) -> String {
        format!("{} {}", self.program.display(), action)
    }
}

#[async_trait]
impl Attester for CommandAttester {
    async fn attestation_token(&self, key_id: &str) -> LoaderResult<String> {
        debug!("Requesting attestation token via {}", self.program.display());

        let output = self
            .command()
            .args(["token", key_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LoaderError::command_failed(self.display_name("token"), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoaderError::Attestation(format!(
                "{} failed: {}",
                self.display_name("token"),
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(LoaderError::Attestation(
                "attestation helper returned an empty token".to_string(),
            ));
        }

        Ok(token)
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> LoaderResult<DecryptionKey> {
        let payload = serde_json::to_vec(wrapped)?;

        let mut child = self
            .command()
            .arg("unwrap")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LoaderError::command_failed(self.display_name("unwrap"), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| LoaderError::io("writing to attestation helper", e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LoaderError::command_failed(self.display_name("unwrap"), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoaderError::Attestation(format!(
                "{} failed: {}",
                self.display_name("unwrap"),
                stderr.trim()
            )));
        }

        let encoded = Zeroizing::new(output.stdout);
        let trimmed = String::from_utf8_lossy(&encoded);
        let key = STANDARD
            .decode(trimmed.trim())
            .map_err(|e| LoaderError::Attestation(format!("helper returned invalid base64: {}", e)))?;

        Ok(DecryptionKey::new(key))
    }
}
