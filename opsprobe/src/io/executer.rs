//! Memoizing executer for validated commands.
//!
//! The [`Executer`] trait decouples the session from the shell. Results are
//! cached by the exact literal command string, so a command the model proposes
//! twice runs once. Tests swap the [`ShellRunner`] for one that counts calls.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::capped_budget;
use crate::io::process::{CommandOutput, run_command_with_timeout, shell_command};

/// Why a command produced no usable output.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("command execution failed: {status}: {output}")]
    Failure { status: ExitStatus, output: String },
    #[error("command execution failed: {0:#}")]
    Spawn(anyhow::Error),
}

/// Boundary to the operating system shell.
pub trait ShellRunner {
    fn run(
        &self,
        command: &str,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> anyhow::Result<CommandOutput>;
}

/// Runs commands through `sh -c`.
pub struct SystemShell;

impl ShellRunner for SystemShell {
    fn run(
        &self,
        command: &str,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> anyhow::Result<CommandOutput> {
        run_command_with_timeout(shell_command(command), timeout, output_limit_bytes)
    }
}

/// Runs accepted commands, at most once per literal string.
pub trait Executer {
    /// Previously stored output for exactly `command`, if any.
    fn cached(&self, command: &str) -> Option<&str>;

    /// Run `command`, serving it from the cache when possible.
    fn run(&mut self, deadline: Instant, command: &str) -> Result<String, ExecutionError>;
}

/// [`Executer`] with an append-only, per-instance result cache.
pub struct CachingExecuter<R> {
    runner: R,
    cache: HashMap<String, String>,
    command_timeout: Duration,
    output_limit_bytes: usize,
}

impl<R: ShellRunner> CachingExecuter<R> {
    pub fn new(runner: R, command_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            runner,
            cache: HashMap::new(),
            command_timeout,
            output_limit_bytes,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl<R: ShellRunner> Executer for CachingExecuter<R> {
    fn cached(&self, command: &str) -> Option<&str> {
        self.cache.get(command).map(String::as_str)
    }

    #[instrument(skip_all, fields(command = %command))]
    fn run(&mut self, deadline: Instant, command: &str) -> Result<String, ExecutionError> {
        if let Some(output) = self.cache.get(command) {
            debug!("serving cached result");
            return Ok(output.clone());
        }

        let Some(timeout) = capped_budget(deadline, self.command_timeout) else {
            warn!("deadline passed before command started");
            return Err(ExecutionError::Timeout(Duration::ZERO));
        };

        info!(timeout_ms = timeout.as_millis() as u64, "running command");
        let output = self
            .runner
            .run(command, timeout, self.output_limit_bytes)
            .map_err(ExecutionError::Spawn)?;
        let text = output.combined().trim().to_string();

        if output.timed_out {
            return Err(ExecutionError::Timeout(timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "command failed");
            return Err(ExecutionError::Failure {
                status: output.status,
                output: text,
            });
        }

        self.cache.insert(command.to_string(), text.clone());
        Ok(text)
    }
}
