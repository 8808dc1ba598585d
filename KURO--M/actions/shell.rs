use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, time::timeout};

const MAX_OUTPUT_BYTES: usize = 32_768;

/// Captured result of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Standard output (lossy UTF-8, truncated).
    pub stdout: String,
    /// Standard error (lossy UTF-8, truncated).
    pub stderr: String,
}

impl ShellOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Shell execution failures.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The shell could not be started.
    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),
    /// The command outlived its deadline and was killed.
    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Runs command text through the platform shell.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    /// Runs `command` and captures its output.
    async fn run(&self, command: &str) -> Result<ShellOutput, ShellError>;
}

/// [`ShellRunner`] backed by `sh -c` (or `cmd /C` on Windows) with a hard
/// deadline; the child is killed when the deadline expires.
#[derive(Debug, Clone, Copy)]
pub struct SystemShell {
    timeout: Duration,
}

impl SystemShell {
    /// Creates a runner with the given deadline.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(&self, command: &str) -> Result<ShellOutput, ShellError> {
        let mut process = if cfg!(windows) {
            let mut process = Command::new("cmd");
            process.arg("/C").arg(command);
            process
        } else {
            let mut process = Command::new("sh");
            process.arg("-c").arg(command);
            process
        };
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = process.spawn()?;
        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ShellOutput {
                    exit_code: output.status.code(),
                    stdout: sanitize_output(&output.stdout),
                    stderr: sanitize_output(&output.stderr),
                })
            }
            Err(_) => Err(ShellError::Timeout(self.timeout)),
        }
    }
}

fn sanitize_output(bytes: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(bytes).trim().to_string();
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n...[truncated]");
    }
    text
}
