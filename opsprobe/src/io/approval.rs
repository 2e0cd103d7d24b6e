//! Approval of validated commands before they run.

use std::io::{BufRead, Write};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::types::ApprovalResponse;
use crate::guided::guided_ask;
use crate::io::llm::ChatModel;

pub const USER_REJECTED_REASON: &str =
    "User did not approve the command. Please suggest a different command or end the session.";

/// Decision on one proposed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub approved: bool,
    /// On rejection, the text handed back to the model.
    pub reason: String,
}

impl Approval {
    pub fn approved(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
        }
    }
}

/// Decides whether a command that passed validation may run.
pub trait Approver {
    fn approve(&mut self, deadline: Instant, command: &str, reason: &str) -> Result<Approval>;
}

/// Approves everything the validator accepted.
#[derive(Debug, Default)]
pub struct AutoApprover;

impl Approver for AutoApprover {
    fn approve(&mut self, _deadline: Instant, command: &str, _reason: &str) -> Result<Approval> {
        debug!(command, "auto-approved");
        Ok(Approval::approved("auto-approved"))
    }
}

/// Asks a person on a line-based terminal.
pub struct HumanApprover<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> HumanApprover<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Approver for HumanApprover<R, W> {
    fn approve(&mut self, _deadline: Instant, command: &str, reason: &str) -> Result<Approval> {
        writeln!(self.output, "The model wants to run: {command}")?;
        if !reason.trim().is_empty() {
            writeln!(self.output, "Reason: {}", reason.trim())?;
        }

        loop {
            write!(self.output, "Run this command? [yes/no]: ")?;
            self.output.flush().context("flush approval prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("read approval answer")?;
            if read == 0 {
                return Err(anyhow!("input closed while waiting for approval"));
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" => {
                    info!(command, "approved by user");
                    return Ok(Approval::approved("approved by user"));
                }
                "no" | "n" => {
                    info!(command, "rejected by user");
                    return Ok(Approval::rejected(USER_REJECTED_REASON));
                }
                _ => writeln!(self.output, "Please answer 'yes' or 'no'.")?,
            }
        }
    }
}

/// Asks a second model whether the command is read-only.
///
/// The model's conversation is reset before every decision so earlier
/// verdicts do not leak into the next one.
pub struct ModelApprover<M> {
    model: M,
    correction_attempts: u32,
}

impl<M: ChatModel> ModelApprover<M> {
    pub fn new(model: M, correction_attempts: u32) -> Self {
        Self {
            model,
            correction_attempts,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: ChatModel> Approver for ModelApprover<M> {
    fn approve(&mut self, deadline: Instant, command: &str, reason: &str) -> Result<Approval> {
        self.model.reset();
        let prompt = format!("Command: {command}\nStated purpose: {reason}");
        let verdict: ApprovalResponse =
            guided_ask(&mut self.model, deadline, &prompt, self.correction_attempts)
                .context("validation model")?;

        info!(command, is_read_only = verdict.is_read_only, "validation model verdict");
        if verdict.is_read_only {
            Ok(Approval::approved(verdict.reason))
        } else {
            Ok(Approval::rejected(verdict.reason))
        }
    }
}
