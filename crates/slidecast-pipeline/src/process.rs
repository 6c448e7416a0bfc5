//! External tool invocation (pdflatex, pdfinfo, pdftoppm, ffmpeg).

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use slidecast_types::{Result, SlidecastError};

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`SlidecastError::CommandFailed`].
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        Err(SlidecastError::CommandFailed {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            message: tail(detail, 20),
        })
    }
}

/// Run `tool` with `args`, killing it if it outlives `timeout`.
///
/// A non-zero exit is not an error here; call [`CommandOutput::check`].
pub async fn run_tool<I, S>(
    tool: &str,
    args: I,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(tool);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!(tool, "Running external command");
    let child = cmd.spawn().map_err(|e| SlidecastError::CommandFailed {
        tool: tool.to_string(),
        exit_code: -1,
        message: format!("failed to start: {e}"),
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SlidecastError::CommandTimeout {
            tool: tool.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    };
    tracing::debug!(
        tool,
        exit_code = result.exit_code,
        stdout_len = result.stdout.len(),
        stderr_len = result.stderr.len(),
        "External command finished"
    );
    Ok(result)
}

/// The last `lines` lines of `text`.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
