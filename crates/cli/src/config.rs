use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harness_core::HarnessConfig;
use tracing::debug;

use crate::cli::RunArgs;

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "harness.toml";

/// Load config from the given path, or `./harness.toml` if it exists,
/// or defaults. Environment overrides apply in every case.
pub fn load(path: Option<&Path>) -> Result<HarnessConfig> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    match config_path {
        Some(p) => {
            debug!(config_path = %p.display(), "Loading config");
            HarnessConfig::from_file(&p).with_context(|| format!("failed to load config: {}", p.display()))
        }
        None => {
            debug!("No config file, using defaults");
            HarnessConfig::from_env().context("invalid configuration from environment")
        }
    }
}

/// Apply command-line overrides on top of file and env settings.
/// Priority: cli flag > env var > config file > default.
pub fn apply_run_overrides(config: &mut HarnessConfig, args: &RunArgs) -> Result<()> {
    if let Some(n) = args.max_concurrency {
        config.scheduler.max_concurrency = n;
    }
    if let Some(n) = args.max_admission_attempts {
        config.scheduler.max_admission_attempts = Some(n);
    }
    if let Some(secs) = args.unit_timeout_secs {
        config.scheduler.unit_timeout_secs = Some(secs);
    }
    if let Some(dir) = &args.artifacts {
        config.report.artifact_dir = dir.clone();
    }
    if let Some(path) = &args.report {
        config.report.report_path = path.clone();
    }
    config.validate().context("invalid command-line override")
}
