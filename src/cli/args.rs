//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// cai-loader - prepare encrypted models for confidential inference
///
/// Fetches the model key from an attestation-gated key broker, decrypts the
/// cached snapshot into a local hub directory and optionally launches the
/// inference server against it.
#[derive(Parser, Debug)]
#[command(name = "cai-loader")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CAI_LOADER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hub cache holding the downloaded (possibly encrypted) models
    #[arg(long, global = true, env = "HF_HUB_CACHE")]
    pub source_cache: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decrypt a model into a local hub directory
    Prepare(PrepareArgs),

    /// Prepare a model, then run a command against it
    Run(RunArgs),

    /// Show a model's encryption manifest without contacting the broker
    Inspect(InspectArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Model selection shared by prepare and run
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model id as published on the hub (e.g. `org/name`)
    #[arg(short, long, env = "MODEL_ID")]
    pub model_id: String,

    /// Destination hub directory for decrypted files
    #[arg(long = "hub", env = "MODEL_HUB")]
    pub hub: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Command to launch once the model is ready
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Model id as published on the hub
    #[arg(short, long, env = "MODEL_ID")]
    pub model_id: String,

    /// Print the manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
