//! Planner - LLM call #1
//!
//! Turns the question into a structured `Plan` under a strict-JSON
//! protocol. After parsing, the plan is cleaned against the allowed
//! tables; a MUST table dropped by cleaning or an unknown table prefix in
//! MUST predicates/joins triggers exactly one retry with a hardened
//! constraint hint. Any parse or schema violation degrades to the
//! default plan, which the pipeline reads as a fallback hint.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{MSchema, Plan, kb::truncate_chars};

use super::{ChatApi, LlmError, extract_json_object};

const SYSTEM_PROMPT: &str = "You are a precise query planner for enterprise EDR analytics.\n\
Your job is to analyze user questions and convert them into structured execution plans.\n\
Return STRICT JSON conforming to the provided schema. No prose, no explanations.";

const FEWSHOT: &str = include_str!("planner_fewshot.md");
const PLAN_SCHEMA: &str = include_str!("plan_schema.json");

const MAX_TOKENS: u32 = 2048;
const SCHEMA_CLIP_CHARS: usize = 3000;
const KB_HINT_CHARS: usize = 2000;
const COLMAP_CHARS: usize = 2000;

static TABLE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.").unwrap());

pub struct Planner<'a> {
    chat: &'a dyn ChatApi,
    temperature: f64,
}

impl<'a> Planner<'a> {
    pub fn new(chat: &'a dyn ChatApi, temperature: f64) -> Self {
        Self { chat, temperature }
    }

    /// Produce a cleaned plan for the question.
    ///
    /// Only HTTP-level errors surface as `Err`; every recoverable failure
    /// returns the default plan.
    pub async fn plan(
        &self,
        question: &str,
        kb_hint: &str,
        effective_schema: &MSchema,
        semantic_tables: &[String],
        semantic_colmap: &BTreeMap<String, Vec<String>>,
    ) -> Result<Plan, LlmError> {
        let allowed_tables = effective_schema.table_names();
        let schema_clip = truncate_chars(
            &serde_json::to_string(effective_schema)?,
            SCHEMA_CLIP_CHARS,
        );
        let allowed_cols_map: BTreeMap<&str, Vec<&str>> = effective_schema
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.as_str(),
                    t.columns.iter().map(|c| c.name.as_str()).collect(),
                )
            })
            .collect();
        let allowed_cols_json =
            truncate_chars(&serde_json::to_string(&allowed_cols_map)?, COLMAP_CHARS);

        let user_prompt = build_prompt(
            question,
            kb_hint,
            &schema_clip,
            semantic_tables,
            semantic_colmap,
            &allowed_tables,
            &allowed_cols_json,
            "",
        )?;

        let raw = self
            .chat
            .chat(Some(SYSTEM_PROMPT), &user_prompt, self.temperature, MAX_TOKENS)
            .await?;

        let mut plan = match parse_plan(&raw) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("planner returned unusable JSON, using default plan: {}", e);
                return Ok(Plan::default());
            }
        };

        let original_must_len = plan.must_tables.len();
        clean_tables(&mut plan, &allowed_tables);

        let need_retry = plan.must_tables.len() < original_must_len
            || has_unknown_table_ref(&plan.must_predicates, &allowed_tables)
            || has_unknown_table_ref(&plan.must_joins, &allowed_tables);

        if need_retry {
            let retry_hint = format!(
                "CRITICAL: Retry. You MUST use ONLY these tables: {}. Remove or replace any table not in this list.",
                sorted_join(&allowed_tables)
            );
            let retry_prompt = build_prompt(
                question,
                kb_hint,
                &schema_clip,
                semantic_tables,
                semantic_colmap,
                &allowed_tables,
                &allowed_cols_json,
                &retry_hint,
            )?;
            let raw_retry = self
                .chat
                .chat(Some(SYSTEM_PROMPT), &retry_prompt, self.temperature, MAX_TOKENS)
                .await?;

            if extract_json_object(&raw_retry).is_some() {
                match parse_plan(&raw_retry) {
                    Ok(mut retried) => {
                        clean_tables(&mut retried, &allowed_tables);
                        plan = retried;
                    }
                    Err(e) => {
                        tracing::warn!("planner retry returned unusable JSON: {}", e);
                        return Ok(Plan::default());
                    }
                }
            }
            tracing::info!("planner constraint retry performed, plan cleaned");
        }

        plan.sanitize();
        tracing::info!(
            "planner produced plan: task={}, subject={}, risk={:?}",
            plan.task.as_str(),
            plan.subject.as_str(),
            plan.risk
        );
        if !plan.must_predicates.is_empty() {
            tracing::debug!("required predicates: {:?}", plan.must_predicates);
        }
        if !plan.should_projection.is_empty() {
            tracing::debug!("preferred projection: {:?}", plan.should_projection);
        }

        Ok(plan)
    }
}

fn parse_plan(raw: &str) -> Result<Plan, LlmError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| LlmError::ParseError("no JSON object in planner response".to_string()))?;
    serde_json::from_str(json).map_err(|e| LlmError::ParseError(e.to_string()))
}

/// Drop plan table entries outside the allowed set.
fn clean_tables(plan: &mut Plan, allowed_tables: &[String]) {
    let keep = |t: &String| allowed_tables.iter().any(|a| a.eq_ignore_ascii_case(t));
    plan.must_tables.retain(keep);
    plan.should_tables.retain(keep);
}

fn has_unknown_table_ref(texts: &[String], allowed_tables: &[String]) -> bool {
    for text in texts {
        for caps in TABLE_REF_RE.captures_iter(text) {
            let table = &caps[1];
            if !allowed_tables.iter().any(|a| a.eq_ignore_ascii_case(table)) {
                return true;
            }
        }
    }
    false
}

fn sorted_join(tables: &[String]) -> String {
    let mut sorted = tables.to_vec();
    sorted.sort();
    sorted.join(", ")
}

#[allow(clippy::too_many_arguments)]
fn build_prompt(
    question: &str,
    kb_hint: &str,
    schema_clip: &str,
    semantic_tables: &[String],
    semantic_colmap: &BTreeMap<String, Vec<String>>,
    allowed_tables: &[String],
    allowed_cols_json: &str,
    retry_hint: &str,
) -> Result<String, LlmError> {
    let colmap_json = truncate_chars(&serde_json::to_string(semantic_colmap)?, COLMAP_CHARS);

    Ok(format!(
        r#"
Question (Chinese):
{question}

Context:
- KB hint (markdown excerpt):
{kb_hint}

- M-Schema (subset JSON):
{schema_clip}

- Semantic candidates:
tables={semantic_tables:?}
columns_by_table={colmap_json}

- STRICT Allowed Tables:
{allowed_tables}

- STRICT Allowed Columns (per table):
{allowed_cols_json}

{fewshot}

Planning Rules (MUST/SHOULD/MAY Framework):
1) MUST constraints are hard requirements - SQL generation will fail if violated:
   - must_tables: Essential tables for the query
   - must_joins: Critical table connections (e.g., "weak_password_app_detail.app_id = weak_password_app.app_id")
   - must_predicates: Non-negotiable filter conditions (e.g., "weak_password_app_detail.pass_wd IS NOT NULL")

2) SHOULD constraints are strong preferences - prioritize but allow flexibility:
   - should_tables: Preferred additional tables for richer data
   - should_predicates: Important filters that enhance results
   - should_projection: Preferred column display order

3) MAY constraints are optional - use when space/performance allows:
   - may_projection: Nice-to-have columns for additional context
   - may_predicates: Optional filters for refinement

4) CRITICAL: Use FULL table.column names in ALL constraints - never use aliases or shortcuts:
   - CORRECT: "weak_password_app_detail.pass_wd IS NOT NULL"
   - WRONG: "wpad.pass_wd IS NOT NULL" or "pass_wd IS NOT NULL"
5) ALL tables referenced in any constraint MUST be included in must_tables or should_tables.
6) For business application queries, prefer subject='app'; include timeframe_days only if a time scope is implied.
7) Categorize constraints by business criticality: core functionality -> MUST, enhancement -> SHOULD, context -> MAY.
8) Ensure constraint consistency: all predicates and joins must reference available tables.
9) Verify that table names in constraints exactly match those available in STRICT Allowed Tables. Do NOT invent tables.
10) Column references (in predicates/projection/groupby/aggregates) MUST be from the STRICT Allowed Columns map for their table.

{retry_hint}

Return ONLY JSON validated by this SCHEMA:
{schema}
"#,
        question = question,
        kb_hint = truncate_chars(kb_hint, KB_HINT_CHARS),
        schema_clip = schema_clip,
        semantic_tables = semantic_tables,
        colmap_json = colmap_json,
        allowed_tables = sorted_join(allowed_tables),
        allowed_cols_json = allowed_cols_json,
        fewshot = FEWSHOT,
        retry_hint = retry_hint,
        schema = PLAN_SCHEMA,
    ))
}
