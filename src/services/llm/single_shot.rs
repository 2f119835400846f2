//! Traditional single-shot generator
//!
//! Fallback path when the two-call pipeline cannot deliver: one
//! user-only prompt with the reduced schema and hard output rules. The
//! result still goes through the SQL guard.

use crate::models::MSchema;

use super::{ChatApi, LlmError};

const TEMPLATE: &str = include_str!("single_shot_prompt.md");

const MAX_TOKENS: u32 = 512;
const TEMPERATURE: f64 = 0.0;

pub async fn generate_single_shot(
    chat: &dyn ChatApi,
    question: &str,
    m_schema: &MSchema,
    allowed_columns: &str,
    kb_snippet: &str,
    evidence: &str,
) -> Result<String, LlmError> {
    let db_schema = serde_json::to_string_pretty(m_schema)?;
    let prompt = TEMPLATE
        .replace("{question}", question.trim())
        .replace("{db_schema}", &db_schema)
        .replace("{allowed_columns}", allowed_columns)
        .replace("{kb_snippet}", kb_snippet)
        .replace("{evidence}", evidence);

    let raw = chat.chat(None, &prompt, TEMPERATURE, MAX_TOKENS).await?;
    Ok(strip_code_fences(&raw))
}

/// Models often wrap the SQL in a ```sql fence despite instructions.
fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    let parts: Vec<&str> = text.split("```").collect();
    if parts.len() < 2 {
        return text.trim().to_string();
    }
    let mut code = parts[1];
    if code.to_lowercase().starts_with("sql\n") {
        code = &code[4..];
    }
    code.trim().to_string()
}
