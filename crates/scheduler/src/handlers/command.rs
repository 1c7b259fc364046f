//! External command handler.
//!
//! Runs `args[0]` with the remaining arguments (no shell) and passes when the
//! process exits with status 0. Captured output is written next to the unit's
//! artifact as `<unit>.log`, which then becomes the unit's artifact.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::dispatch::{Handler, HandlerContext, HandlerError};

#[derive(Debug, Default)]
pub struct CommandHandler {
    working_dir: Option<PathBuf>,
}

impl CommandHandler {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn combine(stdout: &[u8], stderr: &[u8]) -> String {
        let stdout = String::from_utf8_lossy(stdout);
        let stderr = String::from_utf8_lossy(stderr);
        if stderr.is_empty() {
            stdout.into_owned()
        } else if stdout.is_empty() {
            stderr.into_owned()
        } else {
            format!("{stdout}\n--- stderr ---\n{stderr}")
        }
    }

    async fn write_log(path: &Path, content: &str) -> Result<(), HandlerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HandlerError::Failed(format!("create {}: {e}", parent.display())))?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| HandlerError::Failed(format!("write {}: {e}", path.display())))
    }
}

#[async_trait]
impl Handler for CommandHandler {
    async fn run(&mut self, args: &[String], ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| HandlerError::InvalidArgs("missing program".to_string()))?;

        debug!(unit = ctx.unit_name(), program = %program, args = ?rest, "running command");

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| HandlerError::Failed(format!("failed to spawn '{program}': {e}")))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            debug!(unit = ctx.unit_name(), exit_code, "command returned non-zero exit code");
        }

        let log_path = ctx.artifact_path().map(|p| p.with_extension("log"));
        if let Some(path) = log_path {
            let mut content = Self::combine(&output.stdout, &output.stderr);
            if content.is_empty() {
                content = format!("(exit code {exit_code})\n");
            }
            Self::write_log(&path, &content).await?;
            ctx.set_artifact_path(Some(path));
        }

        Ok(output.status.success())
    }
}
