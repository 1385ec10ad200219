mod cli;
mod config;
mod display;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    //  Logging
    let default_filter = if args.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Commands::Read(read_args) => cli::read::execute(read_args),
        cli::Commands::List(list_args) => cli::list::execute(list_args),
        cli::Commands::Xor(xor_args) => cli::xor::execute(xor_args),
        cli::Commands::Config(c) => cli::config_cmd::execute(c),
    }
}
