//! Test-only scripted collaborators for driving sessions without a network or shell.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use crate::io::approval::{Approval, Approver};
use crate::io::executer::{CachingExecuter, ShellRunner};
use crate::io::llm::{ChatModel, TransportError};
use crate::io::process::CommandOutput;

/// A deadline far enough away that no test trips it.
pub fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

/// Agent reply proposing `command` and asking for more data.
pub fn command_reply(command: &str, reason: &str) -> String {
    serde_json::json!({
        "answer": "",
        "run_command": command,
        "reason_for_command": reason,
        "need_more_data": true,
    })
    .to_string()
}

/// Agent reply that ends the session with `answer`.
pub fn answer_reply(answer: &str) -> String {
    serde_json::json!({
        "answer": answer,
        "run_command": "",
        "reason_for_command": "",
        "need_more_data": false,
    })
    .to_string()
}

/// Model that replays canned replies and records every prompt it receives.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: VecDeque<Result<String, TransportError>>,
    pub prompts: Vec<String>,
    pub resets: usize,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(|reply| Ok(reply.into())).collect(),
            ..Self::default()
        }
    }

    /// Model that proposes `command` forever.
    pub fn repeating(command: &str, count: usize) -> Self {
        Self::new(std::iter::repeat_n(command_reply(command, "gather data"), count))
    }

    pub fn then_fail(mut self, err: TransportError) -> Self {
        self.replies.push_back(Err(err));
        self
    }
}

impl ChatModel for ScriptedModel {
    fn ask(&mut self, _deadline: Instant, prompt: &str) -> Result<String, TransportError> {
        self.prompts.push(prompt.to_string());
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Decode("script exhausted".to_string())))
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Shell that records commands instead of running them.
///
/// Unknown commands succeed with `output of <command>`.
#[derive(Debug, Default)]
pub struct CountingShell {
    calls: RefCell<Vec<String>>,
    scripted: HashMap<String, (i32, String)>,
}

impl CountingShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit with `code` and print `stdout`.
    pub fn with_result(mut self, command: &str, code: i32, stdout: &str) -> Self {
        self.scripted
            .insert(command.to_string(), (code, stdout.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ShellRunner for CountingShell {
    fn run(
        &self,
        command: &str,
        _timeout: Duration,
        _output_limit_bytes: usize,
    ) -> anyhow::Result<CommandOutput> {
        self.calls.borrow_mut().push(command.to_string());
        let (code, stdout) = self
            .scripted
            .get(command)
            .cloned()
            .unwrap_or_else(|| (0, format!("output of {command}\n")));
        Ok(CommandOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            timed_out: false,
        })
    }
}

pub fn counting_executer(shell: CountingShell) -> CachingExecuter<CountingShell> {
    CachingExecuter::new(shell, Duration::from_secs(5), 10_000)
}

/// Approver that replays decisions, approving once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedApprover {
    decisions: VecDeque<anyhow::Result<Approval>>,
    pub asked: Vec<String>,
}

impl ScriptedApprover {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn then(mut self, approval: Approval) -> Self {
        self.decisions.push_back(Ok(approval));
        self
    }

    pub fn then_error(mut self, message: &str) -> Self {
        self.decisions.push_back(Err(anyhow::anyhow!(message.to_string())));
        self
    }
}

impl Approver for ScriptedApprover {
    fn approve(
        &mut self,
        _deadline: Instant,
        command: &str,
        _reason: &str,
    ) -> anyhow::Result<Approval> {
        self.asked.push(command.to_string());
        self.decisions
            .pop_front()
            .unwrap_or_else(|| Ok(Approval::approved("scripted")))
    }
}
