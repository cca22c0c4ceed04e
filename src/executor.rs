// ==============================================================================
// executor.rs - External Command Execution
// ==============================================================================
// Description: Argument-list process execution with explicit context
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Commands are never passed through a shell. The execution context carries
// the working directory, the stdout/stderr policy and an optional timeout;
// a timed-out child is killed and reported as ExternalToolTimeout.
// ==============================================================================

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{FinemapError, Result};

/// Resolve `path` against the caller's working directory
///
/// The child runs inside the context's temp dir, so any path handed to it as
/// an argument must not be relative.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| FinemapError::io(path, e))?;
    Ok(cwd.join(path))
}

/// What to do with the child's stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Redirect both streams to the null device
    Discard,
    /// Capture both streams (reported on failure)
    Capture,
}

/// Explicit environment for one external tool invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Scratch directory; also the child's working directory
    pub temp_dir: PathBuf,
    /// Kill the child and fail after this long (None waits indefinitely)
    pub timeout: Option<Duration>,
    pub output: OutputPolicy,
}

impl ExecutionContext {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            timeout: None,
            output: OutputPolicy::Discard,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }
}

/// Program plus explicit argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a bare flag (e.g. `--cojo-slct`)
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a flag followed by its value (e.g. `--chr 22`)
    pub fn opt(mut self, flag: &str, value: impl ToString) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(|s| s.as_str())
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Result of a successful (exit status 0) invocation
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Capability to run an external command to completion
///
/// Implementations must convert a non-zero exit into
/// `FinemapError::ExternalToolFailure`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &CommandSpec, context: &ExecutionContext) -> Result<ExecutionOutcome>;
}

/// Runs commands as child processes on the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &CommandSpec, context: &ExecutionContext) -> Result<ExecutionOutcome> {
        let work_dir = absolute_path(&context.temp_dir)?;
        std::fs::create_dir_all(&work_dir).map_err(|e| FinemapError::io(&work_dir, e))?;

        let (stdout, stderr) = match context.output {
            OutputPolicy::Discard => (Stdio::null(), Stdio::null()),
            OutputPolicy::Capture => (Stdio::piped(), Stdio::piped()),
        };

        debug!("Running {} {}", command.program, command.args.join(" "));
        let started = Instant::now();

        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FinemapError::tool_failure(&command.program, format!("could not execute: {}", e))
            })?;

        let output = match context.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the wait future drops the child, which kills it
                    warn!("{} exceeded timeout of {:?}, killed", command.program, limit);
                    return Err(FinemapError::ExternalToolTimeout {
                        tool: command.program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| FinemapError::tool_failure(&command.program, format!("wait failed: {}", e)))?;

        let elapsed = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let detail = stderr
                .lines()
                .last()
                .or_else(|| stdout.lines().last())
                .map(|line| format!("{}: {}", output.status, line))
                .unwrap_or_else(|| output.status.to_string());
            return Err(FinemapError::tool_failure(&command.program, detail));
        }

        debug!("{} finished in {:.2?}", command.program, elapsed);
        Ok(ExecutionOutcome {
            stdout,
            stderr,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_absolute_path() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_path(Path::new("scratch/a")).unwrap(), cwd.join("scratch/a"));
        assert_eq!(absolute_path(Path::new("/tmp/x")).unwrap(), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_command_spec_builder() {
        let cmd = CommandSpec::new("gcta64")
            .opt("--chr", 22)
            .opt("--maf", 0.01)
            .arg("--cojo-slct");

        assert_eq!(cmd.args, vec!["--chr", "22", "--maf", "0.01", "--cojo-slct"]);
        assert_eq!(cmd.value_of("--chr"), Some("22"));
        assert_eq!(cmd.value_of("--out"), None);
        assert!(cmd.has_flag("--cojo-slct"));
    }

    #[tokio::test]
    async fn test_success_returns_outcome() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path()).with_output(OutputPolicy::Capture);

        let outcome = ProcessExecutor.execute(&sh("echo hello"), &ctx).await.unwrap();
        assert_eq!(outcome.stdout, "hello");
    }

    #[tokio::test]
    async fn test_runs_in_temp_dir() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());

        ProcessExecutor.execute(&sh("touch marker"), &ctx).await.unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path()).with_output(OutputPolicy::Capture);

        let err = ProcessExecutor
            .execute(&sh("echo 'Error: bad bfile' >&2; exit 1"), &ctx)
            .await
            .unwrap_err();

        match err {
            FinemapError::ExternalToolFailure { tool, reason } => {
                assert_eq!(tool, "sh");
                assert!(reason.contains("Error: bad bfile"), "reason: {reason}");
            }
            other => panic!("Expected ExternalToolFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_failure() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());

        let err = ProcessExecutor
            .execute(&CommandSpec::new("definitely-not-a-real-gcta-binary"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FinemapError::ExternalToolFailure { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path()).with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = ProcessExecutor.execute(&sh("sleep 10"), &ctx).await.unwrap_err();

        assert!(matches!(err, FinemapError::ExternalToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
