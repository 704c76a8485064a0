//! docforge CLI — local-first document package generation tool.
//!
//! Ingests standard package vaults into a searchable index and renders
//! customer document sets from placeholder templates.

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
