//! Pipeline services
//!
//! Stage implementations: candidate retrieval, the two LLM calls, the
//! objective validation engine with minimal repair, the SQL guard, and
//! the orchestrating pipeline.

pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod validation;

pub use guard::{GuardOptions, GuardRejection};
pub use llm::{ChatApi, LlmClient, LlmError};
pub use pipeline::{AskOptions, AskRecord, Pipeline, PipelineError};
