//! LLM-driven diagnostic assistant.
//!
//! A user asks an operational question; a model proposes read-only shell
//! commands; each command is validated, approved, executed once, and its output
//! fed back until the model answers or the session runs out of budget. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (command lexing and validation,
//!   allow-list policy, response contracts). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, HTTP model transport, shell
//!   execution, approval prompts). Isolated behind traits to enable scripted tests.
//!
//! Orchestration modules ([`guided`], [`session`], [`app`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod app;
pub mod core;
pub mod exit_codes;
pub mod guided;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
