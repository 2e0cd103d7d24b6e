//! Diagnostic session state machine.
//!
//! A session alternates between asking the model and acting on the command it
//! proposes:
//!
//! ```text
//! Querying -> DecidingOnCommand -> Executing -> Querying
//!     \-> Terminal(Answer | MaxIterations)        (or an error)
//! ```
//!
//! Validation and execution problems never end a session; they become the
//! next prompt and cost an iteration. Transport and schema failures, and an
//! expired deadline, end it with a [`SessionError`].

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::policy::Policy;
use crate::core::types::AgentResponse;
use crate::core::validator::{RejectionKind, validate};
use crate::guided::{GuidedAskError, guided_ask};
use crate::io::approval::Approver;
use crate::io::executer::{ExecutionError, Executer};
use crate::io::llm::{ChatModel, TransportError};

pub const NUDGE_PROMPT: &str = "Please suggest a command to run or end the session.";
pub const MAX_ITERATIONS_MESSAGE: &str = "Analysis incomplete. Reached maximum number of queries.";
pub const NO_OUTPUT: &str = "No output";
const NOT_APPROVED_FALLBACK: &str =
    "The command was not approved. Please suggest a different command or end the session.";

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model calls allowed for one query.
    pub max_iterations: u32,
    /// Attempts per model call to get a well-formed reply.
    pub correction_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 7,
            correction_attempts: 3,
        }
    }
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Answer(String),
    MaxIterations,
}

impl SessionOutcome {
    /// Text shown to the user.
    pub fn message(&self) -> &str {
        match self {
            SessionOutcome::Answer(answer) => answer,
            SessionOutcome::MaxIterations => MAX_ITERATIONS_MESSAGE,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SessionOutcome::Answer(_))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session deadline exceeded")]
    DeadlineExceeded,
    #[error("model request failed: {0}")]
    Transport(#[source] TransportError),
    #[error(transparent)]
    Schema(GuidedAskError),
}

impl From<GuidedAskError> for SessionError {
    fn from(err: GuidedAskError) -> Self {
        match err {
            GuidedAskError::Transport(TransportError::DeadlineExceeded) => {
                SessionError::DeadlineExceeded
            }
            GuidedAskError::Transport(err) => SessionError::Transport(err),
            other => SessionError::Schema(other),
        }
    }
}

/// Progress notifications for callers that want to show what is happening.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    Replied {
        iteration: u32,
        response: &'a AgentResponse,
    },
    CacheHit {
        command: &'a str,
    },
    Rejected {
        command: &'a str,
        kind: &'a RejectionKind,
    },
    NotApproved {
        command: &'a str,
        reason: &'a str,
    },
    Executed {
        command: &'a str,
        output: &'a str,
    },
    Failed {
        command: &'a str,
        error: &'a ExecutionError,
    },
}

enum SessionState {
    Querying { prompt: String },
    DecidingOnCommand { command: String, reason: String },
    Executing { command: String },
    Terminal(SessionOutcome),
}

type EventSink<'s> = dyn FnMut(&SessionEvent<'_>) + 's;

/// One diagnostic conversation.
///
/// The model keeps the conversation and the executer keeps the result cache,
/// so consecutive [`Session::run`] calls build on each other. Drop the
/// session to start over.
pub struct Session<M, E> {
    model: M,
    executer: E,
    policy: Policy,
    config: SessionConfig,
    iterations: u32,
}

impl<M: ChatModel, E: Executer> Session<M, E> {
    pub fn new(model: M, executer: E, policy: Policy, config: SessionConfig) -> Self {
        Self {
            model,
            executer,
            policy,
            config,
            iterations: 0,
        }
    }

    /// Model calls made by the most recent [`Session::run`].
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn executer(&self) -> &E {
        &self.executer
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Answer `query`, driving the model until it finishes or a limit is hit.
    #[instrument(skip_all, fields(max_iterations = self.config.max_iterations))]
    pub fn run(
        &mut self,
        deadline: Instant,
        approver: &mut dyn Approver,
        query: &str,
        mut on_event: impl FnMut(&SessionEvent<'_>),
    ) -> Result<SessionOutcome, SessionError> {
        info!(query, "session started");
        self.iterations = 0;
        let mut state = SessionState::Querying {
            prompt: query.to_string(),
        };

        loop {
            state = match state {
                SessionState::Querying { prompt } => self.query(deadline, &prompt, &mut on_event)?,
                SessionState::DecidingOnCommand { command, reason } => {
                    self.decide(deadline, approver, command, &reason, &mut on_event)
                }
                SessionState::Executing { command } => {
                    self.execute(deadline, &command, &mut on_event)
                }
                SessionState::Terminal(outcome) => {
                    info!(iterations = self.iterations, complete = outcome.is_complete(), "session finished");
                    return Ok(outcome);
                }
            };
        }
    }

    fn query(
        &mut self,
        deadline: Instant,
        prompt: &str,
        on_event: &mut EventSink<'_>,
    ) -> Result<SessionState, SessionError> {
        if remaining_budget(deadline).is_none() {
            warn!(iterations = self.iterations, "deadline passed before model call");
            return Err(SessionError::DeadlineExceeded);
        }

        self.iterations += 1;
        debug!(iteration = self.iterations, prompt, "querying model");
        let response: AgentResponse = guided_ask(
            &mut self.model,
            deadline,
            prompt,
            self.config.correction_attempts,
        )?;
        on_event(&SessionEvent::Replied {
            iteration: self.iterations,
            response: &response,
        });

        if response.is_complete() {
            return Ok(SessionState::Terminal(SessionOutcome::Answer(
                response.answer_text().to_string(),
            )));
        }
        if self.iterations >= self.config.max_iterations {
            warn!(iterations = self.iterations, "reached maximum number of queries");
            return Ok(SessionState::Terminal(SessionOutcome::MaxIterations));
        }

        Ok(match response.proposed_command() {
            Some(command) => SessionState::DecidingOnCommand {
                command: command.to_string(),
                reason: response.reason_for_command.clone(),
            },
            None => SessionState::Querying {
                prompt: NUDGE_PROMPT.to_string(),
            },
        })
    }

    fn decide(
        &mut self,
        deadline: Instant,
        approver: &mut dyn Approver,
        command: String,
        reason: &str,
        on_event: &mut EventSink<'_>,
    ) -> SessionState {
        if let Some(output) = self.executer.cached(&command) {
            debug!(command, "command already executed");
            on_event(&SessionEvent::CacheHit { command: &command });
            return next_prompt(non_empty(output));
        }

        if let Err(kind) = validate(&command, &self.policy) {
            info!(command, %kind, "command rejected by validator");
            on_event(&SessionEvent::Rejected {
                command: &command,
                kind: &kind,
            });
            return next_prompt(format!(
                "The suggested command is invalid: {kind}\n\
                 Do not apologize or mention the incorrect suggestion in your response"
            ));
        }

        match approver.approve(deadline, &command, reason) {
            Ok(approval) if approval.approved => SessionState::Executing { command },
            Ok(approval) => {
                on_event(&SessionEvent::NotApproved {
                    command: &command,
                    reason: &approval.reason,
                });
                if approval.reason.trim().is_empty() {
                    next_prompt(NOT_APPROVED_FALLBACK)
                } else {
                    next_prompt(approval.reason)
                }
            }
            Err(err) => {
                warn!(command, error = %format!("{err:#}"), "approval failed");
                next_prompt(format!("Failed to validate command: {err:#}"))
            }
        }
    }

    fn execute(
        &mut self,
        deadline: Instant,
        command: &str,
        on_event: &mut EventSink<'_>,
    ) -> SessionState {
        match self.executer.run(deadline, command) {
            Ok(output) => {
                on_event(&SessionEvent::Executed {
                    command,
                    output: &output,
                });
                next_prompt(non_empty(&output))
            }
            Err(error) => {
                on_event(&SessionEvent::Failed {
                    command,
                    error: &error,
                });
                next_prompt(format!("Command failed: {error}"))
            }
        }
    }
}

/// Run a single query in a fresh session.
pub fn start_session<M: ChatModel, E: Executer>(
    deadline: Instant,
    model: M,
    executer: E,
    policy: Policy,
    approver: &mut dyn Approver,
    query: &str,
    config: SessionConfig,
) -> Result<SessionOutcome, SessionError> {
    Session::new(model, executer, policy, config).run(deadline, approver, query, |_| {})
}

fn next_prompt(prompt: impl Into<String>) -> SessionState {
    SessionState::Querying {
        prompt: prompt.into(),
    }
}

fn non_empty(output: &str) -> String {
    if output.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        output.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::approval::{Approval, USER_REJECTED_REASON};
    use crate::io::executer::CachingExecuter;
    use crate::test_support::{
        CountingShell, ScriptedApprover, ScriptedModel, answer_reply, command_reply,
        counting_executer, far_deadline,
    };

    fn echo_policy() -> Policy {
        Policy::new(["echo", "ls"], std::iter::empty::<&str>(), ["grep"])
    }

    fn session(
        model: ScriptedModel,
        shell: CountingShell,
    ) -> Session<ScriptedModel, CachingExecuter<CountingShell>> {
        Session::new(
            model,
            counting_executer(shell),
            echo_policy(),
            SessionConfig::default(),
        )
    }

    #[test]
    fn answer_ends_session_after_one_call() {
        let mut session = session(
            ScriptedModel::new([answer_reply("nothing is wrong")]),
            CountingShell::new(),
        );
        let outcome = session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "status?", |_| {})
            .expect("run");
        assert_eq!(outcome, SessionOutcome::Answer("nothing is wrong".to_string()));
        assert_eq!(session.iterations(), 1);
        assert_eq!(session.model().prompts, vec!["status?"]);
    }

    #[test]
    fn command_output_becomes_next_prompt() {
        let mut session = session(
            ScriptedModel::new([command_reply("echo hi | grep h", "check"), answer_reply("done")]),
            CountingShell::new(),
        );
        let outcome = session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .expect("run");
        assert_eq!(outcome.message(), "done");
        assert_eq!(session.model().prompts[1], "output of echo hi | grep h");
        assert_eq!(session.executer().runner().calls(), vec!["echo hi | grep h"]);
    }

    #[test]
    fn max_iterations_stops_after_exactly_seven_calls() {
        let mut session = session(ScriptedModel::repeating("ls", 20), CountingShell::new());
        let outcome = session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .expect("run");
        assert_eq!(outcome, SessionOutcome::MaxIterations);
        assert_eq!(outcome.message(), MAX_ITERATIONS_MESSAGE);
        assert_eq!(session.iterations(), 7);
        assert_eq!(session.model().prompts.len(), 7);
        // The command runs once; the other six proposals are cache hits or the final reply.
        assert_eq!(session.executer().runner().calls().len(), 1);
    }

    #[test]
    fn approver_rejection_reason_is_sent_verbatim() {
        let mut approver = ScriptedApprover::approving().then(Approval::rejected(USER_REJECTED_REASON));
        let mut session = session(
            ScriptedModel::new([command_reply("ls -la", "list"), answer_reply("gave up")]),
            CountingShell::new(),
        );
        session
            .run(far_deadline(), &mut approver, "q", |_| {})
            .expect("run");
        assert_eq!(session.model().prompts[1], USER_REJECTED_REASON);
        assert!(session.executer().runner().calls().is_empty());
        assert_eq!(approver.asked, vec!["ls -la"]);
    }

    #[test]
    fn empty_rejection_reason_falls_back() {
        let mut approver = ScriptedApprover::approving().then(Approval::rejected(""));
        let mut session = session(
            ScriptedModel::new([command_reply("ls", "list"), answer_reply("ok")]),
            CountingShell::new(),
        );
        session
            .run(far_deadline(), &mut approver, "q", |_| {})
            .expect("run");
        assert_eq!(session.model().prompts[1], NOT_APPROVED_FALLBACK);
    }

    #[test]
    fn approver_error_is_reported_to_model() {
        let mut approver = ScriptedApprover::approving().then_error("validator offline");
        let mut session = session(
            ScriptedModel::new([command_reply("ls", "list"), answer_reply("ok")]),
            CountingShell::new(),
        );
        session
            .run(far_deadline(), &mut approver, "q", |_| {})
            .expect("run");
        assert_eq!(
            session.model().prompts[1],
            "Failed to validate command: validator offline"
        );
        assert!(session.executer().runner().calls().is_empty());
    }

    #[test]
    fn invalid_command_is_never_approved_or_run() {
        let mut approver = ScriptedApprover::approving();
        let mut session = session(
            ScriptedModel::new([command_reply("echo hi; rm -rf /", "x"), answer_reply("ok")]),
            CountingShell::new(),
        );
        session
            .run(far_deadline(), &mut approver, "q", |_| {})
            .expect("run");
        assert_eq!(
            session.model().prompts[1],
            "The suggested command is invalid: command chaining is not allowed\n\
             Do not apologize or mention the incorrect suggestion in your response"
        );
        assert!(approver.asked.is_empty());
        assert!(session.executer().runner().calls().is_empty());
    }

    #[test]
    fn repeated_command_is_served_from_cache_without_approval() {
        let mut approver = ScriptedApprover::approving();
        let mut session = session(
            ScriptedModel::new([
                command_reply("ls", "first"),
                command_reply("ls", "again"),
                answer_reply("ok"),
            ]),
            CountingShell::new(),
        );
        let mut hits = 0;
        session
            .run(far_deadline(), &mut approver, "q", |event| {
                if matches!(event, SessionEvent::CacheHit { .. }) {
                    hits += 1;
                }
            })
            .expect("run");
        assert_eq!(hits, 1);
        assert_eq!(approver.asked, vec!["ls"]);
        assert_eq!(session.executer().runner().calls(), vec!["ls"]);
        assert_eq!(session.model().prompts[2], "output of ls");
    }

    #[test]
    fn failed_command_is_reported_and_retried() {
        let shell = CountingShell::new().with_result("ls /missing", 2, "no such file");
        let mut session = session(
            ScriptedModel::new([
                command_reply("ls /missing", "look"),
                command_reply("ls /missing", "look again"),
                answer_reply("missing"),
            ]),
            shell,
        );
        session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .expect("run");
        assert!(session.model().prompts[1].starts_with("Command failed: command execution failed"));
        assert!(session.model().prompts[1].contains("no such file"));
        assert_eq!(session.executer().runner().calls().len(), 2);
    }

    #[test]
    fn empty_output_is_reported_as_no_output() {
        let shell = CountingShell::new().with_result("ls", 0, "  \n");
        let mut session = session(
            ScriptedModel::new([command_reply("ls", "list"), answer_reply("empty")]),
            shell,
        );
        session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .expect("run");
        assert_eq!(session.model().prompts[1], NO_OUTPUT);
    }

    #[test]
    fn reply_without_command_is_nudged() {
        let incomplete = r#"{"answer":"thinking","run_command":"","reason_for_command":"","need_more_data":true}"#;
        let mut session = session(
            ScriptedModel::new([incomplete.to_string(), answer_reply("ok")]),
            CountingShell::new(),
        );
        session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .expect("run");
        assert_eq!(session.model().prompts[1], NUDGE_PROMPT);
    }

    #[test]
    fn expired_deadline_fails_before_calling_model() {
        let mut session = session(ScriptedModel::new([answer_reply("late")]), CountingShell::new());
        let expired = Instant::now() - Duration::from_millis(1);
        let err = session
            .run(expired, &mut ScriptedApprover::approving(), "q", |_| {})
            .unwrap_err();
        assert!(matches!(err, SessionError::DeadlineExceeded));
        assert!(session.model().prompts.is_empty());
    }

    #[test]
    fn transport_error_ends_session() {
        let model = ScriptedModel::new([command_reply("ls", "list")]).then_fail(TransportError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        });
        let mut session = session(model, CountingShell::new());
        let err = session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Status { status: 401, .. })));
        assert_eq!(session.iterations(), 2);
    }

    #[test]
    fn schema_exhaustion_ends_session() {
        let mut session = session(
            ScriptedModel::new(["nope", "nope", "nope"]),
            CountingShell::new(),
        );
        let err = session
            .run(far_deadline(), &mut ScriptedApprover::approving(), "q", |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Schema(GuidedAskError::Schema { attempts: 3, .. })
        ));
    }

    #[test]
    fn start_session_runs_fresh_session() {
        let outcome = start_session(
            far_deadline(),
            ScriptedModel::new([command_reply("echo hi", "greet"), answer_reply("hi")]),
            counting_executer(CountingShell::new()),
            echo_policy(),
            &mut ScriptedApprover::approving(),
            "say hi",
            SessionConfig::default(),
        )
        .expect("run");
        assert_eq!(outcome, SessionOutcome::Answer("hi".to_string()));
    }
}
