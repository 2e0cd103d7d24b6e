//! Static safety validation of model-proposed shell commands.
//!
//! Validation is purely syntactic and allow-list based. Two passes run over
//! the parsed stages:
//!
//! 1. **Lexical hazards**: chaining, substitution, redirection and unmatched
//!    quotes, scanned stage by stage and token by token.
//! 2. **Allow-list**: the first stage's program (and subcommand, when the
//!    policy restricts them) and every piped program.
//!
//! Within each pass the first violation from the left is reported. Nothing is
//! cached: a command is re-validated every time it is proposed.

use thiserror::Error;
use tracing::debug;

use crate::core::lexer::{CharClass, QuoteScanner, Stage, split_stages};
use crate::core::policy::Policy;

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionKind {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command chaining is not allowed")]
    CommandChaining,
    #[error("command substitution is not allowed")]
    CommandSubstitution,
    #[error("redirection is not allowed")]
    Redirection,
    #[error("unmatched quote in argument")]
    UnmatchedQuote,
    #[error("main command is not valid")]
    InvalidMainCommand,
    #[error("command is not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("sub command is not allowed: {0}")]
    SubCommandNotAllowed(String),
}

/// Validate `command` against `policy`, returning its stages when accepted.
pub fn validate(command: &str, policy: &Policy) -> Result<Vec<Stage>, RejectionKind> {
    if command.is_empty() {
        return Err(RejectionKind::EmptyCommand);
    }

    let stages = split_stages(command);
    if stages.is_empty() {
        return Err(RejectionKind::EmptyCommand);
    }

    for stage in &stages {
        check_stage_hazards(stage)?;
    }

    for (index, stage) in stages.iter().enumerate() {
        check_stage_allowed(stage, index == 0, policy)?;
    }

    debug!(command, stages = stages.len(), "command accepted");
    Ok(stages)
}

fn check_stage_hazards(stage: &Stage) -> Result<(), RejectionKind> {
    // Newlines separate commands for `sh`, but tokenizing treats them as
    // plain whitespace, so look for them in the raw stage text.
    let mut scanner = QuoteScanner::new();
    for c in stage.raw.chars() {
        if scanner.feed(c) == CharClass::Live && matches!(c, '\n' | '\r') {
            return Err(RejectionKind::CommandChaining);
        }
    }

    for token in &stage.tokens {
        check_token(token)?;
    }
    Ok(())
}

/// Scan one token for shell metacharacters outside quotes.
fn check_token(token: &str) -> Result<(), RejectionKind> {
    let mut scanner = QuoteScanner::new();
    let mut chars = token.chars().peekable();

    while let Some(c) = chars.next() {
        let class = scanner.feed(c);
        match c {
            ';' | '&' if class == CharClass::Live => return Err(RejectionKind::CommandChaining),
            '`' if class == CharClass::Live => return Err(RejectionKind::CommandSubstitution),
            '$' if class == CharClass::Live && chars.peek() == Some(&'(') => {
                return Err(RejectionKind::CommandSubstitution);
            }
            '>' | '<' if class == CharClass::Live => return Err(RejectionKind::Redirection),
            _ => {}
        }
    }

    if scanner.in_quote() {
        return Err(RejectionKind::UnmatchedQuote);
    }
    Ok(())
}

fn check_stage_allowed(stage: &Stage, is_main: bool, policy: &Policy) -> Result<(), RejectionKind> {
    let Some(program) = stage.program() else {
        return Err(RejectionKind::EmptyCommand);
    };

    if !is_main {
        if !policy.allows_piped_command(program) {
            return Err(RejectionKind::CommandNotAllowed(program.to_string()));
        }
        return Ok(());
    }

    let min_tokens = if policy.restricts_sub_commands() { 2 } else { 1 };
    if stage.tokens.len() < min_tokens {
        return Err(RejectionKind::InvalidMainCommand);
    }
    if !policy.allows_command(program) {
        return Err(RejectionKind::CommandNotAllowed(program.to_string()));
    }
    if policy.restricts_sub_commands() {
        let sub_command = &stage.tokens[1];
        if !policy.allows_sub_command(sub_command) {
            return Err(RejectionKind::SubCommandNotAllowed(sub_command.clone()));
        }
    }
    Ok(())
}
