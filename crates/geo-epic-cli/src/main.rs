mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::ExitCode;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let code: ExitCode = match cli.command {
        Commands::Run(args) => runtime.block_on(commands::run(args))?,
        Commands::Roster(args) => commands::roster(args)?,
        Commands::Calibrate(args) => runtime.block_on(commands::calibrate(args))?,
        Commands::Sensitivity(args) => runtime.block_on(commands::run_sensitivity(args))?,
    };

    std::process::exit(code.into());
}
