//! External process execution with cancellation and output capture.
//!
//! Every lifecycle command (cluster create/delete, registry query, readiness
//! probe) goes through the [`CommandRunner`] seam so tests can substitute a
//! mock and the rest of the daemon never touches `tokio::process` directly.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::errors::ProcessError;

/// Specification of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, without the program name.
    pub args: Vec<String>,
    /// Environment overrides applied on top of the daemon's environment.
    pub env: HashMap<String, String>,
    /// Optional upper bound on execution time.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a spec for the given program and arguments.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    /// Add an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Bound execution time; the child is killed when exceeded.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render the command line for log output.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command.
///
/// Exit status is data here, not an error. Callers classify non-zero exits
/// themselves (a "not found" on delete is not a failure, for example).
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams joined for human-readable diagnostics.
    #[must_use]
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Seam over external command execution.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion, capturing stdout and stderr
    /// separately.
    ///
    /// Returns an error only when the command could not be executed at all,
    /// timed out, or was canceled. Cancellation and timeout kill the child
    /// promptly instead of leaking it.
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError>;
}

/// Real runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Resolves when the timeout elapses; pends forever when there is none.
async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        debug!("exec: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the in-flight future must not leak the child.
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let raw = tokio::select! {
            () = cancel.cancelled() => {
                warn!("canceled: {}", spec.display());
                return Err(ProcessError::Canceled);
            }
            () = deadline(spec.timeout) => {
                let after = spec.timeout.unwrap_or_default();
                warn!("timed out after {after:?}: {}", spec.display());
                return Err(ProcessError::TimedOut { after });
            }
            result = child.wait_with_output() => {
                result.map_err(|source| ProcessError::Spawn {
                    program: spec.program.clone(),
                    source,
                })?
            }
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            exit_code: raw.status.code(),
        };

        debug!(
            "exit {:?}: {}",
            output.exit_code,
            spec.display()
        );
        if !output.stdout.is_empty() {
            debug!("stdout: {}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            debug!("stderr: {}", output.stderr.trim_end());
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("kind", ["get", "clusters"]);
        assert_eq!(spec.display(), "kind get clusters");
    }

    #[test]
    fn test_output_success_requires_zero_exit() {
        let ok = CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        };
        let failed = CommandOutput {
            exit_code: Some(1),
            ..CommandOutput::default()
        };
        let signaled = CommandOutput {
            exit_code: None,
            ..CommandOutput::default()
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!signaled.success());
    }

    #[test]
    fn test_combined_joins_both_streams() {
        let output = CommandOutput {
            stdout: "created\n".to_string(),
            stderr: "warning: slow disk\n".to_string(),
            exit_code: Some(0),
        };
        assert_eq!(output.combined(), "created\nwarning: slow disk");

        let stderr_only = CommandOutput {
            stdout: String::new(),
            stderr: "boom\n".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(stderr_only.combined(), "boom");
    }
}
