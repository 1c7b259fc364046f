use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Full harness configuration, parsed from `harness.toml`.
///
/// Every field has a default, so an empty document is a valid config.
/// `HARNESS_*` environment variables override values read from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl HarnessConfig {
    /// Parse config from a TOML string, apply env overrides, and validate.
    pub fn from_toml(content: &str) -> Result<Self, HarnessError> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, HarnessError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let s = &mut self.scheduler;
        if let Some(v) = env_parsed("HARNESS_MAX_CONCURRENCY") {
            s.max_concurrency = v;
        }
        if let Some(v) = env_parsed("HARNESS_CPU_THRESHOLD") {
            s.cpu_threshold = v;
        }
        if let Some(v) = env_parsed("HARNESS_MEMORY_THRESHOLD") {
            s.memory_threshold = v;
        }
        if let Some(v) = env_parsed("HARNESS_BACKOFF_MS") {
            s.backoff_ms = v;
        }
        if let Some(v) = env_parsed("HARNESS_WARMUP_MS") {
            s.warmup_ms = v;
        }
        if let Some(v) = env_parsed("HARNESS_MAX_ADMISSION_ATTEMPTS") {
            s.max_admission_attempts = Some(v);
        }
        if let Some(v) = env_parsed("HARNESS_UNIT_TIMEOUT_SECS") {
            s.unit_timeout_secs = Some(v);
        }
        if let Some(v) = env_opt("HARNESS_ARTIFACT_DIR") {
            self.report.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = env_opt("HARNESS_REPORT_PATH") {
            self.report.report_path = PathBuf::from(v);
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), HarnessError> {
        self.scheduler.validate()
    }

    /// Print a summary of the effective settings for startup logs.
    pub fn log_summary(&self) {
        let s = &self.scheduler;
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler:  max_concurrency={}, cpu<{}%, memory<{}%",
            s.max_concurrency,
            s.cpu_threshold,
            s.memory_threshold
        );
        tracing::info!(
            "  admission:  backoff={}ms, warmup={}ms, max_attempts={}",
            s.backoff_ms,
            s.warmup_ms,
            s.max_admission_attempts
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".into())
        );
        tracing::info!(
            "  execution:  unit_timeout={}",
            s.unit_timeout_secs
                .map(|n| format!("{}s", n))
                .unwrap_or_else(|| "none".into())
        );
        tracing::info!(
            "  report:     artifacts={}, path={}",
            self.report.artifact_dir.display(),
            self.report.report_path.display()
        );
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Admission and concurrency settings for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the permit pool (ceiling on concurrently running units).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Units are admitted only while CPU load is strictly below this percentage.
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    /// Units are admitted only while memory utilization is strictly below this percentage.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    /// Sleep between admission attempts while the host is overloaded.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Monitor warm-up before each CPU tick read.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    /// Give up admitting a unit after this many overloaded samples. None = wait forever.
    #[serde(default)]
    pub max_admission_attempts: Option<u32>,
    /// Per-unit execution deadline. None = no deadline.
    #[serde(default)]
    pub unit_timeout_secs: Option<u64>,
}

fn default_max_concurrency() -> usize { 5 }
fn default_cpu_threshold() -> f64 { 80.0 }
fn default_memory_threshold() -> f64 { 95.0 }
fn default_backoff_ms() -> u64 { 5000 }
fn default_warmup_ms() -> u64 { 2000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            backoff_ms: default_backoff_ms(),
            warmup_ms: default_warmup_ms(),
            max_admission_attempts: None,
            unit_timeout_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.max_concurrency == 0 {
            return Err(HarnessError::InvalidConfig(
                "scheduler.max_concurrency must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("memory_threshold", self.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(HarnessError::InvalidConfig(format!(
                    "scheduler.{} must be in (0, 100], got {}",
                    name, value
                )));
            }
        }
        if self.max_admission_attempts == Some(0) {
            return Err(HarnessError::InvalidConfig(
                "scheduler.max_admission_attempts must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

// ── Report ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory holding per-unit artifacts (`<unit>.png`, `<unit>.log`).
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Where the JSON batch report is written.
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("reports/report.json")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            report_path: default_report_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = HarnessConfig::from_toml("").unwrap();
        assert_eq!(cfg.scheduler.max_concurrency, 5);
        assert_eq!(cfg.scheduler.cpu_threshold, 80.0);
        assert_eq!(cfg.scheduler.memory_threshold, 95.0);
        assert_eq!(cfg.scheduler.backoff(), Duration::from_secs(5));
        assert_eq!(cfg.scheduler.warmup(), Duration::from_secs(2));
        assert!(cfg.scheduler.max_admission_attempts.is_none());
        assert!(cfg.scheduler.unit_timeout().is_none());
        assert_eq!(cfg.report.artifact_dir, PathBuf::from("artifacts"));
    }

    #[test]
    fn parse_scheduler_section() {
        let toml = r#"
[scheduler]
max_concurrency = 3
cpu_threshold = 70.5
backoff_ms = 250
max_admission_attempts = 4
unit_timeout_secs = 30

[report]
artifact_dir = "/tmp/shots"
"#;
        let cfg = HarnessConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.scheduler.max_concurrency, 3);
        assert_eq!(cfg.scheduler.cpu_threshold, 70.5);
        assert_eq!(cfg.scheduler.memory_threshold, 95.0);
        assert_eq!(cfg.scheduler.backoff(), Duration::from_millis(250));
        assert_eq!(cfg.scheduler.max_admission_attempts, Some(4));
        assert_eq!(cfg.scheduler.unit_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.report.artifact_dir, PathBuf::from("/tmp/shots"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = HarnessConfig::from_toml("[scheduler]\nmax_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let err = HarnessConfig::from_toml("[scheduler]\nmemory_threshold = 120.0\n").unwrap_err();
        assert!(err.to_string().contains("memory_threshold"));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = HarnessConfig::from_toml("[scheduler\n").unwrap_err();
        assert!(matches!(err, HarnessError::ConfigParse(_)));
    }

    #[test]
    fn env_override_report_path() {
        // SAFETY: test-only, nextest runs each test in its own process
        unsafe {
            std::env::set_var("HARNESS_REPORT_PATH", "/tmp/override.json");
        }
        let cfg = HarnessConfig::from_toml("[report]\nreport_path = \"out.json\"\n").unwrap();
        assert_eq!(cfg.report.report_path, PathBuf::from("/tmp/override.json"));
        unsafe {
            std::env::remove_var("HARNESS_REPORT_PATH");
        }
    }
}
