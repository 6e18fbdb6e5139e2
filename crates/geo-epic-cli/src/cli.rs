use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "geo-epic", version, about = "Batch runner and calibration driver for crop-simulation engine runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured batch against the engine.
    Run(RunArgs),
    /// Preview the filtered roster without invoking the engine.
    Roster(RosterArgs),
    /// Calibrate one or more parameter models against the workspace objective.
    Calibrate(CalibrateArgs),
    /// Sample the problem's parameter space and rank each parameter's effect.
    Sensitivity(SensitivityArgs),
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Args)]
pub struct RosterArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Args)]
pub struct CalibrateArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long, default_value_t = 20)]
    pub population: usize,
    #[arg(long, default_value_t = 10)]
    pub generations: usize,
}

#[derive(Args)]
pub struct SensitivityArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long, default_value = "morris")]
    pub method: String,
    #[arg(long, default_value_t = 50)]
    pub samples: usize,
}
