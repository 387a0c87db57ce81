//! Process execution primitives.

use serde::Serialize;
use std::path::Path;
use std::process::{Command, Output};

use crate::error::{Error, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

/// Run `program` with `args` in `dir`, capturing output.
///
/// A non-zero exit is reported through [`CommandOutput::success`]; only a
/// failure to spawn the process is an error.
pub fn run_in_dir(
    program: &str,
    args: &[String],
    dir: &Path,
    env: &[(&str, &str)],
) -> Result<CommandOutput> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .envs(env.iter().copied())
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", program, e),
                Some(dir.display().to_string()),
            )
            .with_hint(format!("Is '{}' installed and on PATH?", program))
        })?;

    Ok(CommandOutput::from_output(&output))
}
