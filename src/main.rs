mod aggregate;
mod api;
mod cli;
mod command;
mod engine;
mod environment;
mod error;
mod logging;
mod model;
mod orchestrator;
mod platform;
mod text_summary;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let code = cli::run(args).await?;
    // Forward the engine's exit status.
    std::process::exit(code);
}
