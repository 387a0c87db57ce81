//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Process execution with captured output
//! - `shell` - Shell quoting for rendered command lines

pub mod command;
pub mod shell;
