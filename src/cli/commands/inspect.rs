//! Inspect command - show a model's encryption manifest

use crate::cli::args::InspectArgs;
use crate::config::schema::Config;
use crate::error::LoaderResult;
use crate::loader::HubLoader;
use crate::ui::{self, UiContext};
use std::path::PathBuf;

pub async fn execute(
    args: InspectArgs,
    config: &Config,
    source_cache: Option<PathBuf>,
) -> LoaderResult<()> {
    let loader = HubLoader::from_config(config, source_cache);
    let found = loader.inspect(&args.model_id).await?;

    if args.json {
        let value = match &found {
            Some((path, manifest)) => serde_json::json!({
                "encrypted": true,
                "manifest_path": path,
                "manifest": manifest,
            }),
            None => serde_json::json!({ "encrypted": false }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let ctx = UiContext::detect();
    let Some((path, manifest)) = found else {
        ui::step_warn_hint(
            &ctx,
            &format!("{} is not encrypted", args.model_id),
            &format!(
                "no manifest under {}",
                loader.locator().cache_root().display()
            ),
        );
        return Ok(());
    };

    ui::section(&ctx, &args.model_id);
    ui::key_value(&ctx, "manifest", &path.display().to_string());
    let supported = if loader.registry().supports(&manifest.broker_kind) {
        "supported"
    } else {
        "unsupported"
    };
    ui::key_value(
        &ctx,
        "broker",
        &format!("{} ({})", manifest.broker_kind, supported),
    );
    ui::key_value(&ctx, "endpoint", manifest.broker_endpoint.as_str());
    ui::key_value(&ctx, "key_id", &manifest.key_id);
    ui::key_value(
        &ctx,
        "workers",
        &loader
            .decryptor()
            .worker_count(manifest.files.len())
            .to_string(),
    );
    for file in &manifest.files {
        ui::remark(&ctx, &file.display().to_string());
    }

    Ok(())
}
