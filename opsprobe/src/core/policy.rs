//! Allow-list policy governing which commands the validator accepts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Immutable allow-list of primary, sub and piped commands.
///
/// A policy is fixed once a session is set up. There are no setters; build a
/// new value to change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    allowed_commands: BTreeSet<String>,
    #[serde(default)]
    allowed_sub_commands: BTreeSet<String>,
    #[serde(default)]
    allowed_piped_commands: BTreeSet<String>,
}

impl Policy {
    pub fn new<C, S, P>(commands: C, sub_commands: S, piped_commands: P) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            allowed_commands: commands.into_iter().map(Into::into).collect(),
            allowed_sub_commands: sub_commands.into_iter().map(Into::into).collect(),
            allowed_piped_commands: piped_commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Read-only `kubectl` inspection.
    pub fn kubernetes() -> Self {
        Self::new(
            ["kubectl"],
            ["get", "describe", "logs", "top", "explain"],
            COMMON_PIPED,
        )
    }

    /// Read-only host inspection tools, no subcommand restriction.
    pub fn linux() -> Self {
        Self::new(
            [
                "cat", "df", "du", "free", "id", "ls", "lsblk", "lscpu", "nproc", "ps", "ss",
                "stat", "uname", "uptime", "vmstat", "w", "who",
            ],
            std::iter::empty::<&str>(),
            COMMON_PIPED,
        )
    }

    pub fn allows_command(&self, program: &str) -> bool {
        self.allowed_commands.contains(program)
    }

    pub fn allows_sub_command(&self, sub_command: &str) -> bool {
        self.allowed_sub_commands.contains(sub_command)
    }

    pub fn allows_piped_command(&self, program: &str) -> bool {
        self.allowed_piped_commands.contains(program)
    }

    /// True when the second token of the first stage must be allow-listed.
    pub fn restricts_sub_commands(&self) -> bool {
        !self.allowed_sub_commands.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.allowed_commands.iter().map(String::as_str)
    }

    pub fn sub_commands(&self) -> impl Iterator<Item = &str> {
        self.allowed_sub_commands.iter().map(String::as_str)
    }

    pub fn piped_commands(&self) -> impl Iterator<Item = &str> {
        self.allowed_piped_commands.iter().map(String::as_str)
    }
}

const COMMON_PIPED: [&str; 8] = ["awk", "cut", "grep", "head", "sort", "tail", "uniq", "wc"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_policy_restricts_sub_commands() {
        let policy = Policy::kubernetes();
        assert!(policy.allows_command("kubectl"));
        assert!(policy.restricts_sub_commands());
        assert!(policy.allows_sub_command("logs"));
        assert!(!policy.allows_sub_command("delete"));
        assert!(policy.allows_piped_command("grep"));
    }

    #[test]
    fn linux_policy_has_no_sub_command_list() {
        let policy = Policy::linux();
        assert!(policy.allows_command("df"));
        assert!(!policy.allows_command("rm"));
        assert!(!policy.restricts_sub_commands());
    }

    #[test]
    fn policy_deserializes_with_optional_lists() {
        let policy: Policy = toml::from_str(r#"allowed_commands = ["echo"]"#).expect("parse");
        assert!(policy.allows_command("echo"));
        assert!(!policy.restricts_sub_commands());
        assert_eq!(policy.piped_commands().count(), 0);
    }
}
