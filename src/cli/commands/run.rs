//! Run command - prepare a model, then hand off to the inference server

use super::prepare::prepare_model;
use crate::cli::args::RunArgs;
use crate::config::schema::Config;
use crate::error::{LoaderError, LoaderResult};
use crate::loader::PrepareOutcome;
use crate::ui::{self, UiContext};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// L2 size hint passed to OpenBLAS in the child
const OPENBLAS_L2_SIZE: &str = "134217728";

pub async fn execute(
    args: RunArgs,
    config: &Config,
    source_cache: Option<PathBuf>,
) -> LoaderResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Preparing {}", args.model.model_id));

    let source_root = source_cache
        .clone()
        .unwrap_or_else(|| config.cache.source_dir());
    let outcome = prepare_model(&ctx, &args.model, config, source_cache).await?;
    let env = hub_environment(&outcome, &args.model.hub, &source_root);

    let Some((program, rest)) = args.command.split_first() else {
        return Err(LoaderError::User("no command given".to_string()));
    };
    let command_line = args.command.join(" ");
    ui::step_info(&ctx, &format!("Starting {}", command_line));
    info!("Launching {}", command_line);
    for (name, value) in &env {
        debug!("{}={}", name, value.to_string_lossy());
    }

    let status = Command::new(program)
        .args(rest)
        .envs(env.iter().map(|(k, v)| (*k, v)))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| LoaderError::command_failed(command_line.clone(), e))?;

    match status.code() {
        Some(0) => Ok(()),
        code => Err(LoaderError::CommandExit {
            command: command_line,
            code: code.unwrap_or(-1),
        }),
    }
}

/// Environment for the child: offline hub pointed at the prepared cache.
///
/// Decrypted models are served from `destination`; unencrypted ones straight
/// from the source cache.
pub fn hub_environment(
    outcome: &PrepareOutcome,
    destination: &Path,
    source_cache: &Path,
) -> Vec<(&'static str, OsString)> {
    let hub_cache = match outcome {
        PrepareOutcome::Decrypted { .. } => destination,
        PrepareOutcome::Unencrypted { .. } => source_cache,
    };

    vec![
        ("HF_HUB_OFFLINE", OsString::from("1")),
        ("HF_HUB_CACHE", hub_cache.as_os_str().to_os_string()),
        ("OPENBLAS_L2_SIZE", OsString::from(OPENBLAS_L2_SIZE)),
    ]
}
