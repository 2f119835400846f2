//! Generator - LLM call #2
//!
//! Produces up to K candidate SQLs under the safety contract. The model
//! is instructed to self-check each candidate against the MUST
//! constraints and drop failures before emitting; the validation engine
//! re-checks everything regardless.

use crate::models::{SafetyContract, SqlCandidate};

use super::{ChatApi, LlmError, extract_json_object};

const SYSTEM_PROMPT: &str = include_str!("generator_system.md");
const FEWSHOT: &str = include_str!("generator_fewshot.md");

const MAX_TOKENS: u32 = 3072;

pub struct Generator<'a> {
    chat: &'a dyn ChatApi,
    temperature: f64,
}

impl<'a> Generator<'a> {
    pub fn new(chat: &'a dyn ChatApi, temperature: f64) -> Self {
        Self { chat, temperature }
    }

    /// Generate candidates; an unusable response yields an empty list
    /// (the pipeline's fallback signal), only HTTP errors are `Err`.
    pub async fn generate(
        &self,
        question: &str,
        plan_json: &str,
        contract: &SafetyContract,
        n_candidates: usize,
    ) -> Result<Vec<SqlCandidate>, LlmError> {
        let contract_json = serde_json::to_string(contract)?;
        let user_prompt = build_prompt(question, plan_json, &contract_json, n_candidates);

        let raw = self
            .chat
            .chat(Some(SYSTEM_PROMPT), &user_prompt, self.temperature, MAX_TOKENS)
            .await?;

        let Some(json) = extract_json_object(&raw) else {
            tracing::warn!("no JSON object in generator response");
            return Ok(Vec::new());
        };
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("generator JSON parse failed: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut candidates = Vec::new();
        if let Some(entries) = value.get("candidates").and_then(|c| c.as_array()) {
            for entry in entries {
                match SqlCandidate::from_value(entry.clone()) {
                    Some(candidate) => candidates.push(candidate),
                    None => tracing::warn!("skipping unusable candidate entry"),
                }
            }
        }

        tracing::info!("generator produced {} SQL candidate(s)", candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            tracing::debug!(
                "candidate {}: {} (confidence {:.2})",
                i + 1,
                candidate.label,
                candidate.confidence
            );
        }

        Ok(candidates)
    }
}

fn build_prompt(
    question: &str,
    plan_json: &str,
    contract_json: &str,
    n_candidates: usize,
) -> String {
    format!(
        r#"
Task: Generate up to {n_candidates} SQL candidates.

Question:
{question}

PLAN(JSON):
{plan_json}

SAFETY_CONTRACT(JSON):
{contract_json}

{fewshot}

Generation Rules (MUST/SHOULD/MAY Framework):
1. MUST Constraints (Hard Requirements - Failure to comply means rejection):
   - Use ONLY allowed_tables & allowed_columns from the contract
   - Include ALL must_predicates in WHERE clause
   - Include ALL must_joins when multiple tables are used
   - Respect forbidden_clauses (typically no ORDER BY)

2. SHOULD Constraints (Strong Preferences - Prioritize but allow flexibility):
   - Prefer should_predicates when they enhance the query
   - Use should_projection for column ordering and selection
   - Balance SHOULD constraints with query clarity

3. MAY Constraints (Optional - Use when space/performance allows):
   - Consider may_predicates for additional filtering
   - Include may_projection columns if they add value

4. Additional Rules:
   - Add timeframe constraints if timeframe_days is specified
   - Always include LIMIT (default 200) unless aggregating
   - Generate candidates ranked by SHOULD satisfaction (best first)
   - CRITICAL: Filter out any candidate where must_* checks fail before returning
   - Self-validate each candidate and exclude failures from the result

Return ONLY JSON in this exact format:
{{
  "candidates": [
    {{
      "label": "string description",
      "sql": "SELECT ... FROM ... WHERE ... LIMIT ...",
      "checks": [
        {{"name": "must_predicates_present", "pass": true}},
        {{"name": "must_joins_present", "pass": true}},
        {{"name": "only_allowed_tables_columns", "pass": true}},
        {{"name": "should_predicates_considered", "pass": true}},
        {{"name": "timeframe_applied", "pass": true}}
      ],
      "confidence": 0.9
    }}
  ]
}}
"#,
        n_candidates = n_candidates,
        question = question,
        plan_json = plan_json,
        contract_json = contract_json,
        fewshot = FEWSHOT,
    )
}
