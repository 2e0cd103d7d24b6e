//! Structured replies with bounded self-correction.
//!
//! [`guided_ask`] sends a prompt, then checks the reply in three steps: JSON
//! syntax, the response type's JSON Schema, and deserialization. A reply that
//! fails any step is answered with a correction prompt carrying the parse
//! error and the original prompt, until the attempt budget runs out.

use std::time::Instant;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::StructuredResponse;
use crate::io::llm::{ChatModel, TransportError};

#[derive(Debug, Error)]
pub enum GuidedAskError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to parse model response after {attempts} attempts: {last_error}")]
    Schema { attempts: u32, last_error: String },
    #[error("response schema is invalid: {0}")]
    InvalidSchema(String),
}

/// Ask `model` until it returns a reply that parses as `T`.
///
/// `max_attempts` counts model calls; zero is treated as one. The malformed
/// payload is never returned.
#[instrument(skip_all, fields(max_attempts))]
pub fn guided_ask<T, M>(
    model: &mut M,
    deadline: Instant,
    prompt: &str,
    max_attempts: u32,
) -> Result<T, GuidedAskError>
where
    T: StructuredResponse,
    M: ChatModel + ?Sized,
{
    let validator = compile_schema(T::SCHEMA)?;
    let max_attempts = max_attempts.max(1);
    let mut next_prompt = prompt.to_string();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let raw = model.ask(deadline, &next_prompt)?;
        match parse_structured::<T>(&validator, &raw) {
            Ok(value) => {
                debug!(attempt, "structured reply accepted");
                return Ok(value);
            }
            Err(err) => {
                warn!(attempt, max_attempts, error = %err, "malformed structured reply");
                next_prompt = correction_prompt(&err, prompt);
                last_error = err;
            }
        }
    }

    Err(GuidedAskError::Schema {
        attempts: max_attempts,
        last_error,
    })
}

/// Prompt sent after a malformed reply.
pub fn correction_prompt(error: &str, original_prompt: &str) -> String {
    format!(
        "Error: Failed to parse your response. Answer only with the requested JSON format. \
         The error was: {error}\n\nOriginal prompt: {original_prompt}\n\
         Do not apologize or mention the formatting error in your response"
    )
}

fn compile_schema(schema: &str) -> Result<Validator, GuidedAskError> {
    let schema: Value =
        serde_json::from_str(schema).map_err(|err| GuidedAskError::InvalidSchema(err.to_string()))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| GuidedAskError::InvalidSchema(err.to_string()))
}

fn parse_structured<T: StructuredResponse>(validator: &Validator, raw: &str) -> Result<T, String> {
    let instance: Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(|err| format!("invalid JSON: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(format!("schema validation failed: {}", messages.join("; ")));
    }
    serde_json::from_value(instance).map_err(|err| err.to_string())
}

/// Models often wrap JSON in a Markdown fence; accept the fenced body.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}
