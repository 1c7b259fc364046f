use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parallel test harness with load-aware admission control.
///
/// Runs every unit of a plan concurrently, never more than the configured
/// number at once, and holds back new units while the host is busy.
#[derive(Parser, Debug)]
#[command(name = "harness", about = "Admission-controlled parallel test harness")]
pub struct CliArgs {
    /// Path to config file (default: ./harness.toml if present)
    #[arg(long, global = true, env = "HARNESS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a batch and write its report
    Run(RunArgs),
    /// List the handler names units can refer to
    Handlers,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Plan file: `.toml` with `[[unit]]` tables, anything else a comma-separated table
    #[arg(long, env = "HARNESS_PLAN")]
    pub plan: PathBuf,

    /// Report output path (overrides config)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Artifact directory (overrides config)
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Maximum units in flight (overrides config)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Give up on a unit after this many overloaded samples
    #[arg(long)]
    pub max_admission_attempts: Option<u32>,

    /// Fail a unit whose handler runs longer than this
    #[arg(long)]
    pub unit_timeout_secs: Option<u64>,
}
