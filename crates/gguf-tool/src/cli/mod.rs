pub mod config_cmd;
pub mod list;
pub mod read;
pub mod xor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gguf-tool",
    version,
    about = "Inspect and produce GGUF model files"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GlobalArgs {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the metadata and tensor table of a GGUF file.
    Read(ReadArgs),

    /// Summarise every GGUF file below a directory.
    List(ListArgs),

    /// Write the XOR network's parameters as a GGUF model.
    Xor(XorArgs),

    /// View / edit configuration.
    Config(ConfigArgs),
}

//  Subcommand argument structs

#[derive(Debug, clap::Args, Clone)]
pub struct ReadArgs {
    /// Path to the GGUF model file.
    pub model_path: PathBuf,

    /// Emit JSON instead of the text report.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args, Clone)]
pub struct ListArgs {
    /// Directory to scan (overrides config).
    #[arg(long, env = "GGUF_MODELS_DIR")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, clap::Args, Clone)]
pub struct XorArgs {
    /// Output directory (overrides config).
    #[arg(short = 'm', long = "model-path", env = "GGUF_MODELS_DIR")]
    pub model_path: Option<PathBuf>,

    /// Seed for weight initialization (random if omitted).
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display the current configuration.
    Show,
    /// Set a configuration value.
    Set { key: String, value: String },
}
