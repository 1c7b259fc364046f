use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One schedulable piece of work: a batch-unique name bound to a handler
/// and its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub name: String,
    pub handler: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkUnit {
    pub fn new(name: impl Into<String>, handler: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            args,
        }
    }
}

/// Recorded result of executing one work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub unit_name: String,
    pub passed: bool,
    /// Whole seconds of wall-clock time spent inside the handler.
    pub duration_secs: u64,
    pub artifact_path: Option<PathBuf>,
    /// Why the unit failed, when it failed for a reason other than the handler returning false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn passed(unit_name: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            unit_name: unit_name.into(),
            passed: true,
            duration_secs,
            artifact_path: None,
            error: None,
        }
    }

    pub fn failed(unit_name: impl Into<String>, duration_secs: u64, error: Option<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            passed: false,
            duration_secs,
            artifact_path: None,
            error,
        }
    }

    pub fn with_artifact(mut self, path: Option<PathBuf>) -> Self {
        self.artifact_path = path;
        self
    }
}
