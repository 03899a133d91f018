mod cli;
mod config;
mod error;
mod gitlab;
mod output;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = cli::Cli::parse();
    cli::execute(cli).await
}
