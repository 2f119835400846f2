//! t2sql
//!
//! Constrained two-stage NL-to-SQL pipeline: a planner LLM call produces
//! a typed plan, a safety contract scopes it to the allowed schema
//! subset, a generator LLM call proposes candidate SQLs, and an
//! objective AST validation engine (with minimal repair and
//! deterministic selection) plus a final SQL guard ensure the output
//! only ever references authorized tables and columns and carries the
//! mandatory predicates.

pub mod config;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use models::{KbCatalog, MSchema, Plan, SafetyContract, SqlCandidate};
pub use services::guard::{GuardOptions, GuardRejection};
pub use services::llm::{ChatApi, LlmClient, LlmError};
pub use services::pipeline::{AskOptions, AskRecord, Pipeline, PipelineError};

#[cfg(test)]
mod tests;
