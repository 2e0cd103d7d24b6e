//! I/O helpers: configuration, model transport, prompts, and command execution.

pub mod approval;
pub mod config;
pub mod executer;
pub mod llm;
pub mod process;
pub mod prompt;
