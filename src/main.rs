use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod config;
mod console;
mod error;
mod executor;
mod git;
mod orchestrator;
mod process;
mod signal;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing - only show logs with --verbose
    let filter = if cli.verbose {
        EnvFilter::new("ralphex=debug")
    } else {
        EnvFilter::new("ralphex=warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => cli::run::execute(args).await,
        Commands::Plan(args) => cli::plan::execute(args).await,
        Commands::Schema(args) => cli::schema::execute(args),
    }
}
