//! Chat model transport.
//!
//! [`ChatModel`] is the single "ask" primitive the rest of the crate builds
//! on. A model owns its conversation: every successful exchange is appended to
//! the history and sent again with the next prompt. [`HttpChatModel`] talks to
//! an OpenAI-compatible `/chat/completions` endpoint (plain or Azure).

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::budget::capped_budget;
use crate::io::config::{ModelConfig, Pricing};

/// Why a model call produced no reply.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("deadline exceeded before the model replied")]
    DeadlineExceeded,
    #[error("failed to send request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status code: {status}\n{body}")]
    Status { status: u16, body: String },
    #[error("failed to decode chat response: {0}")]
    Decode(String),
    #[error("chat response contained no choices")]
    EmptyChoices,
}

/// A conversational model that remembers previous exchanges.
pub trait ChatModel {
    /// Send `prompt` as the next user message and return the reply text.
    fn ask(&mut self, deadline: Instant, prompt: &str) -> Result<String, TransportError>;

    /// Forget the conversation, keeping only the system prompt.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token counts reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// How requests authenticate.
#[derive(Clone, PartialEq, Eq)]
enum Auth {
    Bearer(String),
    AzureKey(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(..)"),
            Auth::AzureKey(_) => f.write_str("AzureKey(..)"),
        }
    }
}

/// [`ChatModel`] over an OpenAI-compatible HTTP endpoint.
#[derive(Debug)]
pub struct HttpChatModel {
    client: Client,
    name: String,
    url: String,
    auth: Auth,
    temperature: f64,
    pricing: Pricing,
    request_timeout: Duration,
    history: Vec<Message>,
    usage: Usage,
}

impl HttpChatModel {
    pub fn new(
        config: &ModelConfig,
        system_prompt: &str,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        let base = config.base_url.trim_end_matches('/');
        let (url, auth) = match &config.azure_api_version {
            Some(version) => (
                format!("{base}/chat/completions?api-version={version}"),
                Auth::AzureKey(config.auth_token.clone()),
            ),
            None => (
                format!("{base}/chat/completions"),
                Auth::Bearer(config.auth_token.clone()),
            ),
        };
        Ok(Self {
            client,
            name: config.name.clone(),
            url,
            auth,
            temperature: config.temperature,
            pricing: config.pricing,
            request_timeout,
            history: vec![Message::new(Role::System, system_prompt)],
            usage: Usage::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Accumulated cost, e.g. `gpt-4o-mini: 0.0002$ for input(1200), 0.0001$ for output(150)`.
    pub fn log_usage(&self) -> String {
        format_usage(&self.name, self.pricing, self.usage)
    }

    fn send(&self, messages: &[Message], timeout: Duration) -> Result<ChatResponse, TransportError> {
        let request = ChatRequest {
            model: &self.name,
            messages,
            temperature: self.temperature,
        };
        let builder = self.client.post(&self.url).timeout(timeout).json(&request);
        let builder = match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::AzureKey(key) => builder.header("api-key", key),
        };

        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model endpoint returned an error");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

impl ChatModel for HttpChatModel {
    #[instrument(skip_all, fields(model = %self.name, history = self.history.len()))]
    fn ask(&mut self, deadline: Instant, prompt: &str) -> Result<String, TransportError> {
        let timeout =
            capped_budget(deadline, self.request_timeout).ok_or(TransportError::DeadlineExceeded)?;
        debug!(prompt, "asking model");

        let mut messages = self.history.clone();
        messages.push(Message::new(Role::User, prompt));
        let response = self.send(&messages, timeout)?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .ok_or(TransportError::EmptyChoices)?
            .message
            .content;
        debug!(reply = %reply, "model replied");

        self.history = messages;
        self.history.push(Message::new(Role::Assistant, reply.clone()));
        self.usage.add(response.usage);
        Ok(reply)
    }

    fn reset(&mut self) {
        self.history.truncate(1);
    }
}

pub fn format_usage(name: &str, pricing: Pricing, usage: Usage) -> String {
    let input_cost = pricing.input * usage.prompt_tokens as f64 / 1000.0;
    let output_cost = pricing.output * usage.completion_tokens as f64 / 1000.0;
    format!(
        "{name}: {input_cost:.4}$ for input({}), {output_cost:.4}$ for output({})",
        usage.prompt_tokens, usage.completion_tokens
    )
}
