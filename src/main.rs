//! cai-loader CLI entry point

use cai_loader::cli::{commands, Cli, Commands};
use cai_loader::config::ConfigManager;
use cai_loader::error::{LoaderError, LoaderResult};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        // The child already reported its own failure
        Err(LoaderError::CommandExit { code, .. }) => {
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LoaderResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_tracing(cli.verbose, &config.general.log_format);

    match cli.command {
        Commands::Prepare(args) => commands::prepare(args, &config, cli.source_cache).await,
        Commands::Run(args) => commands::run(args, &config, cli.source_cache).await,
        Commands::Inspect(args) => commands::inspect(args, &config, cli.source_cache).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_tracing(verbose: u8, log_format: &str) {
    let default = match verbose {
        0 => "cai_loader=warn",
        1 => "cai_loader=info",
        _ => "cai_loader=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
