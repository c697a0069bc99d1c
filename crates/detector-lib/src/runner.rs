//! External command execution with bounded retries
//!
//! Every cluster interaction ends up here. A spawn failure or a timeout
//! fails the attempt and is retried with a linear backoff; a process that
//! ran to completion is returned as is, whatever its exit code. The final
//! failure is handed back as a [`CommandOutput`], never as an error.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when no attempt produced a process result
pub const FAILED_EXIT_CODE: i32 = 1;

/// Retry behaviour for external commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after a failed attempt (1-based), no jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Captured result of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A successful invocation with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// An invocation that never produced a process result
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(FAILED_EXIT_CODE, "", reason)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Successful and with something on stdout
    pub fn has_output(&self) -> bool {
        self.success() && !self.stdout.is_empty()
    }

    /// Best available explanation for a failure
    pub fn error_text(&self) -> &str {
        if !self.stderr.is_empty() {
            &self.stderr
        } else if !self.stdout.is_empty() {
            &self.stdout
        } else {
            "unknown error"
        }
    }

    fn from_process(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// Spawns external processes under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    policy: RetryPolicy,
}

impl CommandRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `argv` with the runner's attempt budget
    pub async fn run(&self, argv: &[String], timeout: Duration) -> CommandOutput {
        self.run_with_attempts(argv, self.policy.max_attempts, timeout)
            .await
    }

    /// Run `argv` with an explicit attempt budget
    pub async fn run_with_attempts(
        &self,
        argv: &[String],
        max_attempts: u32,
        timeout: Duration,
    ) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::failed("empty command");
        };

        let attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(Ok(output)) => return CommandOutput::from_process(output),
                Ok(Err(e)) => last_error = format!("failed to run {}: {}", program, e),
                Err(_) => {
                    last_error = format!("timed out after {:.1}s", timeout.as_secs_f64())
                }
            }

            debug!(
                program = %program,
                attempt = attempt,
                max_attempts = attempts,
                error = %last_error,
                "Command attempt failed"
            );

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        warn!(
            program = %program,
            attempts = attempts,
            error = %last_error,
            "Command failed after all attempts"
        );
        CommandOutput::failed(last_error)
    }
}
