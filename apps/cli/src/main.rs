//! DigestKit CLI: turn a reading list into a clustered, narrated digest.
//!
//! Fetches every linked article, summarizes it, groups related articles by
//! topic, and writes the result as a JSON digest.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
