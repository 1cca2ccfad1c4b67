//! Bulk decryption of a snapshot's encrypted files
//!
//! Files are independent, so they are decrypted on tokio's blocking pool
//! with at most `worker_count` tasks in flight. Every dispatched file runs
//! to completion; failures are collected and returned together.

use crate::config::schema::DecryptConfig;
use crate::crypto::{self, DecryptionKey};
use crate::error::{DecryptErrorKind, DecryptionFailures, FileDecryptionError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Called once per finished file with its source path and whether it succeeded
pub type ProgressFn = Arc<dyn Fn(&Path, bool) + Send + Sync>;

/// Number of workers for a batch.
///
/// One unit of parallelism is left to the host process, the pool never
/// exceeds the file count, and an explicit cap can only lower it.
pub fn worker_count(file_count: usize, available: usize, cap: Option<usize>) -> usize {
    let cpu_bound = available.saturating_sub(1).max(1);
    let workers = file_count.min(cpu_bound);
    cap.map_or(workers, |c| workers.min(c)).max(1)
}

/// Decrypts batches of files into an output directory
#[derive(Clone)]
pub struct BulkDecryptor {
    available: usize,
    max_workers: Option<usize>,
    overwrite: bool,
    progress: Option<ProgressFn>,
}

impl BulkDecryptor {
    pub fn new(config: &DecryptConfig) -> Self {
        Self {
            available: num_cpus::get(),
            max_workers: config.max_workers,
            overwrite: config.overwrite,
            progress: None,
        }
    }

    /// Report each finished file to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Workers used for a batch of `file_count` files
    pub fn worker_count(&self, file_count: usize) -> usize {
        worker_count(file_count, self.available, self.max_workers)
    }

    /// Decrypt every input into `output_dir`.
    ///
    /// `output_dir` must exist. The output for each input is its basename
    /// with the encryption suffix removed. Returns the written paths in input
    /// order, or every per-file failure. The key is dropped (and zeroed) once
    /// the last worker finishes.
    pub async fn decrypt_all(
        &self,
        key: DecryptionKey,
        inputs: &[PathBuf],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, DecryptionFailures> {
        let workers = self.worker_count(inputs.len());
        info!(
            "Decrypting {} file(s) with {} worker(s)",
            inputs.len(),
            workers
        );

        let key = Arc::new(key);
        let mut outcomes: Vec<Option<Result<PathBuf, DecryptErrorKind>>> =
            inputs.iter().map(|_| None).collect();
        let mut task_index = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut pending = inputs.iter().enumerate();

        loop {
            while tasks.len() < workers {
                let Some((index, input)) = pending.next() else {
                    break;
                };
                let Some(name) = crypto::output_file_name(input) else {
                    outcomes[index] = Some(Err(DecryptErrorKind::Worker(
                        "input has no usable file name".to_string(),
                    )));
                    continue;
                };
                let output = output_dir.join(name);
                let input = input.clone();
                let key = Arc::clone(&key);
                let overwrite = self.overwrite;

                debug!("Decrypting {} -> {}", input.display(), output.display());
                let handle = tasks.spawn_blocking(move || {
                    crypto::decrypt_file(&key, &input, &output, overwrite).map(|()| output)
                });
                task_index.insert(handle.id(), index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(DecryptErrorKind::Worker(e.to_string()))),
            };
            if let Some(index) = task_index.remove(&id) {
                if let Some(progress) = &self.progress {
                    progress(&inputs[index], outcome.is_ok());
                }
                outcomes[index] = Some(outcome);
            }
        }
        drop(key);

        let mut written = Vec::with_capacity(inputs.len());
        let mut failures = DecryptionFailures::default();
        for (input, outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                Some(Ok(output)) => written.push(output),
                Some(Err(kind)) => {
                    warn!("Failed to decrypt {}: {}", input.display(), kind);
                    failures.0.push(FileDecryptionError {
                        path: input.clone(),
                        kind,
                    });
                }
                None => failures.0.push(FileDecryptionError {
                    path: input.clone(),
                    kind: DecryptErrorKind::Worker("task result lost".to_string()),
                }),
            }
        }

        if failures.is_empty() {
            Ok(written)
        } else {
            Err(failures)
        }
    }
}
