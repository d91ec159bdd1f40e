mod bootstrap_helpers;
mod commands;
mod report;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use pulse_cli::Cli;

use crate::bootstrap_helpers::init_tracing;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    commands::run_cli(cli).await
}
