//! Deterministic, pure logic shared by the opsprobe core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod lexer;
pub mod policy;
pub mod types;
pub mod validator;
