//! Stable exit codes for opsprobe CLI commands.

/// Command succeeded, or the session produced an answer.
pub const OK: i32 = 0;
/// Command failed due to invalid config, a transport or schema failure, or other errors.
pub const INVALID: i32 = 1;
/// The session hit its iteration limit without an answer.
pub const INCOMPLETE: i32 = 2;
/// `opsprobe check` rejected the command.
pub const REJECTED: i32 = 3;
