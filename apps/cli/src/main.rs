//! BuildLens CLI — Path of Exile 2 build analysis tool.
//!
//! Decodes Path of Building exports, enriches them from community data
//! sources, and produces an LLM-written analysis report.

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
