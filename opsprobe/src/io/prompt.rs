//! System prompt rendering for the diagnostic and approval models.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::policy::Policy;
use crate::core::types::AgentKind;

const KUBERNETES_TEMPLATE: &str = include_str!("prompts/kubernetes.md");
const LINUX_TEMPLATE: &str = include_str!("prompts/linux.md");
const APPROVER_TEMPLATE: &str = include_str!("prompts/approver.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("kubernetes", KUBERNETES_TEMPLATE)
            .context("load kubernetes template")?;
        env.add_template("linux", LINUX_TEMPLATE)
            .context("load linux template")?;
        env.add_template("approver", APPROVER_TEMPLATE)
            .context("load approver template")?;
        Ok(Self { env })
    }

    /// System prompt for the diagnostic agent, listing what `policy` allows.
    pub fn agent_system_prompt(&self, kind: AgentKind, policy: &Policy) -> Result<String> {
        let template = self.env.get_template(kind.as_str())?;
        let rendered = template
            .render(context! {
                commands => policy.commands().collect::<Vec<_>>(),
                sub_commands => policy.sub_commands().collect::<Vec<_>>(),
                piped => policy.piped_commands().collect::<Vec<_>>(),
            })
            .with_context(|| format!("render {} system prompt", kind.as_str()))?;
        debug!(kind = kind.as_str(), bytes = rendered.len(), "rendered agent prompt");
        Ok(rendered)
    }

    /// System prompt for the model that classifies commands as read-only.
    pub fn approver_system_prompt(&self, kind: AgentKind) -> Result<String> {
        let template = self.env.get_template("approver")?;
        let rendered = template
            .render(context! { agent => kind.as_str() })
            .context("render approver system prompt")?;
        Ok(rendered)
    }
}
