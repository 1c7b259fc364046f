//! Batch reports and the sinks that consume them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harness_core::Outcome;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Aggregate figures for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Sum of per-unit handler durations.
    pub total_unit_seconds: u64,
    /// Time from the first submission until the barrier released.
    pub wall_clock_seconds: f64,
}

impl Summary {
    pub fn from_outcomes(entries: &[Outcome], wall_clock_seconds: f64) -> Self {
        let passed = entries.iter().filter(|o| o.passed).count();
        Self {
            total: entries.len(),
            passed,
            failed: entries.len() - passed,
            total_unit_seconds: entries.iter().map(|o| o.duration_secs).sum(),
            wall_clock_seconds,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Ordered outcomes of one batch plus its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<Outcome>,
    pub summary: Summary,
}

impl BatchReport {
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, entries: Vec<Outcome>) -> Self {
        let wall_clock = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let summary = Summary::from_outcomes(&entries, wall_clock);
        Self {
            batch_id: Uuid::new_v4(),
            started_at,
            finished_at,
            entries,
            summary,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.entries.iter().filter(|o| !o.passed)
    }
}

/// Consumes a finished batch report.
pub trait ReportSink: Send + Sync {
    fn write(&self, report: &BatchReport) -> Result<(), ReportError>;
}

/// Writes the report as pretty-printed JSON, creating parent directories.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn write(&self, report: &BatchReport) -> Result<(), ReportError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&self.path, json)?;
        info!(path = %self.path.display(), entries = report.entries.len(), "report written");
        Ok(())
    }
}

/// Emits one line per unit and the summary through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn write(&self, report: &BatchReport) -> Result<(), ReportError> {
        for outcome in &report.entries {
            if outcome.passed {
                info!(unit = %outcome.unit_name, duration_secs = outcome.duration_secs, "PASS");
            } else {
                warn!(
                    unit = %outcome.unit_name,
                    duration_secs = outcome.duration_secs,
                    error = outcome.error.as_deref().unwrap_or("handler returned false"),
                    "FAIL"
                );
            }
        }
        let s = &report.summary;
        info!(
            batch_id = %report.batch_id,
            total = s.total,
            passed = s.passed,
            failed = s.failed,
            total_unit_seconds = s.total_unit_seconds,
            wall_clock_seconds = s.wall_clock_seconds,
            "batch summary"
        );
        Ok(())
    }
}
