//! opsprobe configuration stored under `$XDG_CONFIG_HOME/opsprobe/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::policy::Policy;
use crate::core::types::AgentKind;

pub const AGENT_TOKEN_ENV: &str = "OPSPROBE_AGENT_TOKEN";
pub const VALIDATION_TOKEN_ENV: &str = "OPSPROBE_VALIDATION_TOKEN";

/// opsprobe configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values in [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Which diagnostic agent to run.
    pub agent_kind: AgentKind,

    /// How proposed commands are approved before they run.
    pub approval: ApprovalMode,

    /// Model calls allowed per session.
    pub max_iterations: u32,

    /// Attempts the model gets to produce a well-formed reply.
    pub correction_attempts: u32,

    /// Wall-clock budget for one session, in seconds.
    pub session_timeout_secs: u64,

    /// Upper bound for a single command, in seconds.
    pub command_timeout_secs: u64,

    /// Upper bound for a single model request, in seconds.
    pub http_timeout_secs: u64,

    /// Truncate command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub agent: ModelConfig,

    /// Second model used when `approval = "model"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ModelConfig>,

    /// Replaces the agent kind's built-in allow-lists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask on the terminal.
    #[default]
    Prompt,
    /// Ask a second model whether the command is read-only.
    Model,
    /// Run every command that passes validation.
    Auto,
}

/// Endpoint and credentials of an OpenAI-compatible chat model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    pub auth_token: String,
    /// When set, the endpoint is treated as Azure OpenAI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_api_version: Option<String>,
    pub temperature: f64,
    pub pricing: Pricing,
}

/// Price per 1K tokens.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            auth_token: String::new(),
            azure_api_version: None,
            temperature: 0.0,
            pricing: Pricing {
                input: 0.00015,
                output: 0.0006,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_kind: AgentKind::default(),
            approval: ApprovalMode::default(),
            max_iterations: 7,
            correction_attempts: 3,
            session_timeout_secs: 120,
            command_timeout_secs: 30,
            http_timeout_secs: 45,
            output_limit_bytes: 100_000,
            agent: ModelConfig::default(),
            validation: None,
            policy: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.correction_attempts == 0 {
            return Err(anyhow!("correction_attempts must be > 0"));
        }
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow!("http_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        self.agent.validate("agent")?;
        match (&self.validation, self.approval) {
            (Some(model), _) => model.validate("validation")?,
            (None, ApprovalMode::Model) => {
                return Err(anyhow!("approval = \"model\" requires a [validation] model"));
            }
            (None, _) => {}
        }
        if let Some(policy) = &self.policy
            && policy.commands().next().is_none()
        {
            return Err(anyhow!("policy.allowed_commands must not be empty"));
        }
        Ok(())
    }

    /// The allow-list in effect: the `[policy]` override or the agent preset.
    pub fn policy(&self) -> Policy {
        self.policy
            .clone()
            .unwrap_or_else(|| self.agent_kind.default_policy())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Replace model tokens with values found through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let token = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = token(AGENT_TOKEN_ENV) {
            debug!(var = AGENT_TOKEN_ENV, "agent token taken from environment");
            self.agent.auth_token = value;
        }
        if let Some(model) = self.validation.as_mut()
            && let Some(value) = token(VALIDATION_TOKEN_ENV)
        {
            debug!(var = VALIDATION_TOKEN_ENV, "validation token taken from environment");
            model.auth_token = value;
        }
    }
}

impl ModelConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("{section}.name is required"));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("{section}.base_url is required"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("{section}.temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/opsprobe/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| anyhow!("cannot determine config directory"))?;
    Ok(dir.join("opsprobe").join("config.toml"))
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut cfg = read_config(path)?;
    cfg.apply_env_overrides(|name| std::env::var(name).ok());
    cfg.validate()?;
    Ok(cfg)
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Write the default config unless a file already exists (or `force`).
///
/// Returns true when a file was written.
pub fn ensure_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    write_config(path, &Config::default())?;
    info!(path = %path.display(), "wrote default config");
    Ok(true)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = read_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.agent_kind = AgentKind::Linux;
        cfg.agent.azure_api_version = Some("2024-06-01".to_string());
        write_config(&path, &cfg).expect("write");
        assert_eq!(read_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_iterations = 3\n\n[agent]\nname = \"llama3\"\nbase_url = \"http://localhost:11434/v1\"\n",
        )
        .expect("write");
        let cfg = read_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.correction_attempts, 3);
        assert_eq!(cfg.agent.name, "llama3");
        assert_eq!(cfg.agent.pricing, ModelConfig::default().pricing);
        cfg.validate().expect("valid");
    }

    #[test]
    fn policy_override_replaces_preset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "agent_kind = \"linux\"\n\n[policy]\nallowed_commands = [\"journalctl\"]\nallowed_piped_commands = [\"grep\"]\n",
        )
        .expect("write");
        let policy = read_config(&path).expect("load").policy();
        assert!(policy.allows_command("journalctl"));
        assert!(!policy.allows_command("df"));
    }

    #[test]
    fn model_approval_requires_validation_model() {
        let cfg = Config {
            approval: ApprovalMode::Model,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("[validation]"));

        let cfg = Config {
            approval: ApprovalMode::Model,
            validation: Some(ModelConfig::default()),
            ..Config::default()
        };
        cfg.validate().expect("valid");
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let cfg = Config {
            max_iterations: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            output_limit_bytes: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_tokens_override_file_values() {
        let mut cfg = Config {
            validation: Some(ModelConfig::default()),
            ..Config::default()
        };
        cfg.agent.auth_token = "from-file".to_string();
        cfg.apply_env_overrides(|name| match name {
            AGENT_TOKEN_ENV => Some("agent-env".to_string()),
            VALIDATION_TOKEN_ENV => Some("validation-env".to_string()),
            _ => None,
        });
        assert_eq!(cfg.agent.auth_token, "agent-env");
        assert_eq!(
            cfg.validation.map(|model| model.auth_token),
            Some("validation-env".to_string())
        );
    }

    #[test]
    fn blank_env_token_is_ignored() {
        let mut cfg = Config::default();
        cfg.agent.auth_token = "from-file".to_string();
        cfg.apply_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(cfg.agent.auth_token, "from-file");
    }

    #[test]
    fn ensure_config_keeps_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        assert!(ensure_config(&path, false).expect("create"));
        fs::write(&path, "max_iterations = 4\n").expect("edit");
        assert!(!ensure_config(&path, false).expect("keep"));
        assert_eq!(read_config(&path).expect("load").max_iterations, 4);
        assert!(ensure_config(&path, true).expect("overwrite"));
        assert_eq!(read_config(&path).expect("load").max_iterations, 7);
    }
}
