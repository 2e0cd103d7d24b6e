//! Structured response contracts exchanged with models.
//!
//! Each type carries the JSON Schema it must satisfy. Parsing either fully
//! succeeds into the type or fails; no field is ever half-populated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::policy::Policy;

const AGENT_RESPONSE_SCHEMA: &str = include_str!("../../schemas/agent_response.schema.json");
const APPROVAL_RESPONSE_SCHEMA: &str = include_str!("../../schemas/approval_response.schema.json");

/// A model reply type with an embedded JSON Schema.
pub trait StructuredResponse: DeserializeOwned {
    /// JSON Schema (draft 2020-12) the raw reply must satisfy.
    const SCHEMA: &'static str;
}

/// Reply of the diagnostic agent for one turn.
///
/// Absent optional fields serialize as omitted rather than `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default, alias = "final_answer", skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_command: Option<String>,
    #[serde(default)]
    pub reason_for_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_more_data: Option<bool>,
}

impl AgentResponse {
    /// The proposed command, exactly as sent. An empty string means none.
    pub fn proposed_command(&self) -> Option<&str> {
        self.run_command.as_deref().filter(|cmd| !cmd.is_empty())
    }

    /// True when the model signals it has everything it needs.
    ///
    /// An explicit `need_more_data` wins; without it, a reply that proposes
    /// no command is final.
    pub fn is_complete(&self) -> bool {
        match self.need_more_data {
            Some(need_more) => !need_more,
            None => self.proposed_command().is_none(),
        }
    }

    pub fn answer_text(&self) -> &str {
        self.answer.as_deref().unwrap_or_default()
    }
}

impl StructuredResponse for AgentResponse {
    const SCHEMA: &'static str = AGENT_RESPONSE_SCHEMA;
}

/// Verdict of a model asked to classify a command before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub is_read_only: bool,
    pub reason: String,
}

impl StructuredResponse for ApprovalResponse {
    const SCHEMA: &'static str = APPROVAL_RESPONSE_SCHEMA;
}

/// Which kind of diagnostic agent a session runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Kubernetes,
    Linux,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Kubernetes => "kubernetes",
            AgentKind::Linux => "linux",
        }
    }

    /// Built-in allow-list for this agent.
    pub fn default_policy(self) -> Policy {
        match self {
            AgentKind::Kubernetes => Policy::kubernetes(),
            AgentKind::Linux => Policy::linux(),
        }
    }
}
