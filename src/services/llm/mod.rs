//! LLM stages
//!
//! Two calls per question: the planner turns the question into a typed
//! `Plan`, the generator produces candidate SQLs under the safety
//! contract. A third, single-shot path backs the traditional fallback.
//! All calls go through the `ChatApi` trait so tests can script the
//! model.

mod client;
mod generator;
mod planner;
mod single_shot;

pub use client::{ChatApi, LlmClient};
pub use generator::Generator;
pub use planner::Planner;
pub use single_shot::generate_single_shot;

/// LLM stage errors. Only HTTP-level failures abort a request; parse
/// failures degrade into stage-level defaults.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    MissingApiKey,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}

/// Locate the outermost JSON object in a model response (strict-JSON
/// prompts still come back wrapped in prose or fences at times).
pub(crate) fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests;
