//! Prepare command - decrypt a model into a local hub directory

use crate::cli::args::{ModelArgs, PrepareArgs};
use crate::config::schema::Config;
use crate::error::LoaderResult;
use crate::loader::{HubLoader, ModelLoader, PrepareOutcome};
use crate::manifest::EncryptionManifest;
use crate::ui::{self, DecryptProgress, UiContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn execute(
    args: PrepareArgs,
    config: &Config,
    source_cache: Option<PathBuf>,
) -> LoaderResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Preparing {}", args.model.model_id));

    let outcome = prepare_model(&ctx, &args.model, config, source_cache).await?;

    match outcome {
        PrepareOutcome::Unencrypted { .. } => {
            ui::outro_success(&ctx, "Nothing to decrypt");
        }
        PrepareOutcome::Decrypted {
            snapshot_dir,
            files,
            ..
        } => {
            ui::outro_success(
                &ctx,
                &format!(
                    "Decrypted {} file(s) into {}",
                    files.len(),
                    snapshot_dir.display()
                ),
            );
        }
    }

    Ok(())
}

/// Run `prepare` with terminal progress; shared with `run`
pub(crate) async fn prepare_model(
    ctx: &UiContext,
    model: &ModelArgs,
    config: &Config,
    source_cache: Option<PathBuf>,
) -> LoaderResult<PrepareOutcome> {
    let progress = DecryptProgress::new(ctx);
    let reporter = progress.clone();
    let announcer = progress.clone();
    let ui_ctx = *ctx;

    let loader = HubLoader::from_config(config, source_cache)
        .with_manifest_observer(Arc::new(
            move |path: &Path, manifest: &EncryptionManifest, workers: usize| {
                ui::step_ok_detail(&ui_ctx, "Manifest found", &path.display().to_string());
                ui::key_value(&ui_ctx, "broker", manifest.broker_kind.as_str());
                ui::key_value(&ui_ctx, "endpoint", manifest.broker_endpoint.as_str());
                ui::key_value(&ui_ctx, "files", &manifest.files.len().to_string());
                ui::key_value(&ui_ctx, "workers", &workers.to_string());
                announcer.start(manifest.files.len() as u64);
            },
        ))
        .with_progress(Arc::new(move |path: &Path, ok: bool| {
            reporter.on_file(path, ok)
        }));

    let result = loader.prepare(&model.model_id, &model.hub).await;
    progress.finish();

    if let Ok(PrepareOutcome::Unencrypted { .. }) = &result {
        ui::step_warn_hint(
            ctx,
            &format!("{} is not encrypted", model.model_id),
            &format!("serving from {}", loader.locator().cache_root().display()),
        );
    }
    result
}
