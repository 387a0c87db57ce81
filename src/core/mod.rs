// Public modules
pub mod action;
pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod variable;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use orchestrator::Orchestrator;
