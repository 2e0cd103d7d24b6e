//! Wiring from [`Config`] to live sessions.
//!
//! `App` owns everything that outlives a single query: the prompt engine, the
//! approval mode, and the validation model when one is configured.

use std::io;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::approval::{AutoApprover, HumanApprover, ModelApprover};
use crate::io::config::{ApprovalMode, Config, ModelConfig};
use crate::io::executer::{CachingExecuter, SystemShell};
use crate::io::llm::HttpChatModel;
use crate::io::prompt::PromptEngine;
use crate::session::{Session, SessionConfig, SessionEvent, SessionOutcome};

pub type LiveSession = Session<HttpChatModel, CachingExecuter<SystemShell>>;

pub struct App {
    config: Config,
    prompts: PromptEngine,
    approval: ApprovalMode,
    validator: Option<ModelApprover<HttpChatModel>>,
}

impl App {
    /// `assume_yes` switches approval to automatic regardless of the config.
    pub fn new(config: Config, assume_yes: bool) -> Result<Self> {
        let prompts = PromptEngine::new()?;
        let approval = if assume_yes {
            ApprovalMode::Auto
        } else {
            config.approval
        };
        let validator = match (approval, &config.validation) {
            (ApprovalMode::Model, Some(model_config)) => {
                let system_prompt = prompts.approver_system_prompt(config.agent_kind)?;
                let model = connect(&config, model_config, &system_prompt)
                    .context("connect validation model")?;
                Some(ModelApprover::new(model, config.correction_attempts))
            }
            _ => None,
        };
        debug!(?approval, agent_kind = config.agent_kind.as_str(), "app configured");
        Ok(Self {
            config,
            prompts,
            approval,
            validator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh session: new conversation, empty result cache.
    pub fn session(&self) -> Result<LiveSession> {
        let policy = self.config.policy();
        let system_prompt = self
            .prompts
            .agent_system_prompt(self.config.agent_kind, &policy)?;
        let model = connect(&self.config, &self.config.agent, &system_prompt)
            .context("connect agent model")?;
        let executer = CachingExecuter::new(
            SystemShell,
            self.config.command_timeout(),
            self.config.output_limit_bytes,
        );
        Ok(Session::new(
            model,
            executer,
            policy,
            SessionConfig {
                max_iterations: self.config.max_iterations,
                correction_attempts: self.config.correction_attempts,
            },
        ))
    }

    /// Answer one query within the configured session timeout.
    pub fn ask(
        &mut self,
        session: &mut LiveSession,
        query: &str,
        on_event: impl FnMut(&SessionEvent<'_>),
    ) -> Result<SessionOutcome> {
        let deadline = Instant::now() + self.config.session_timeout();
        let outcome = match (self.approval, self.validator.as_mut()) {
            (ApprovalMode::Model, Some(validator)) => {
                session.run(deadline, validator, query, on_event)
            }
            (ApprovalMode::Auto, _) => session.run(deadline, &mut AutoApprover, query, on_event),
            _ => {
                // Locked only for this query so the chat loop can read the next line.
                let stdin = io::stdin();
                let mut human = HumanApprover::new(stdin.lock(), io::stderr());
                session.run(deadline, &mut human, query, on_event)
            }
        };
        outcome.context("diagnostic session failed")
    }

    /// Token and cost summary for the agent model and, if any, the validation model.
    pub fn usage_lines(&self, session: &LiveSession) -> Vec<String> {
        let mut lines = vec![session.model().log_usage()];
        if let Some(validator) = &self.validator {
            lines.push(validator.model().log_usage());
        }
        lines
    }
}

fn connect(config: &Config, model: &ModelConfig, system_prompt: &str) -> Result<HttpChatModel> {
    Ok(HttpChatModel::new(model, system_prompt, config.http_timeout())?)
}

/// One progress line for the terminal, if the event deserves one.
pub fn describe_event(event: &SessionEvent<'_>) -> Option<String> {
    match event {
        SessionEvent::Replied { .. } => None,
        SessionEvent::CacheHit { command } => Some(format!("Reusing earlier output of `{command}`")),
        SessionEvent::Rejected { command, kind } => Some(format!("Refused `{command}`: {kind}")),
        SessionEvent::NotApproved { command, .. } => Some(format!("Not running `{command}`")),
        SessionEvent::Executed { command, .. } => Some(format!("Ran `{command}`")),
        SessionEvent::Failed { command, error } => Some(format!("`{command}` failed: {error}")),
    }
}
