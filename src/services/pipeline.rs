//! Pipeline orchestration
//!
//! Wires the stages end to end for one question:
//! shortlist -> context -> planner -> contract -> generator ->
//! validation/repair -> selection -> guard. Recoverable stage failures
//! route into the traditional single-shot fallback; LLM transport errors
//! abort the request.

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::config::Config;
use crate::models::{KbCatalog, MSchema, Plan, SafetyContract, SqlCandidate};

use super::guard::{self, GuardOptions};
use super::llm::{ChatApi, Generator, LlmError, Planner, generate_single_shot};
use super::retrieval::context::{
    COLUMNS_PER_TABLE, MAX_CANDIDATE_TABLES, allowed_columns_listing, build_evidence,
    ensure_contract_columns, merge_plan_tables, reorder_by_projection, select_columns,
};
use super::retrieval::semantic::{SemanticRetriever, merge_candidates};
use super::retrieval::shortlist::{BASE_TOPK, auto_select_tables};
use super::retrieval::tokenizer::tokenize;
use super::validation::engine::validate_and_select_best;

const KB_SNIPPET_CHARS: usize = 2000;
const REORDERED_COLUMNS_CAP: usize = 12;
const FALLBACK_TOPK: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("no relevant tables found for the question")]
    NoRelevantTables,

    #[error("no SQL passed validation")]
    NoResult,
}

#[derive(Debug, Clone)]
pub struct AskOptions {
    /// How many guarded SQL records to emit (first is the selected one).
    pub sql_topk: usize,
    pub use_semantic: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self { sql_topk: 1, use_semantic: false }
    }
}

/// One JSON-lines output record.
#[derive(Debug, Clone, Serialize)]
pub struct AskRecord {
    pub question: String,
    pub sql: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
}

/// Per-process pipeline state: read-only schema/KB plus the LLM client.
pub struct Pipeline {
    schema: Arc<MSchema>,
    kb: Arc<KbCatalog>,
    chat: Arc<dyn ChatApi>,
    semantic: Option<Arc<dyn SemanticRetriever>>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        schema: Arc<MSchema>,
        kb: Arc<KbCatalog>,
        chat: Arc<dyn ChatApi>,
        config: Config,
    ) -> Self {
        Self { schema, kb, chat, semantic: None, config }
    }

    pub fn with_semantic_retriever(mut self, retriever: Arc<dyn SemanticRetriever>) -> Self {
        self.semantic = Some(retriever);
        self
    }

    /// Answer one question. Returns the guarded records (selected SQL
    /// first), or an error when neither pipeline nor fallback produced
    /// anything.
    pub async fn ask(
        &self,
        question: &str,
        options: &AskOptions,
    ) -> Result<Vec<AskRecord>, PipelineError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("ask", request_id = %request_id);
        self.ask_inner(question, options).instrument(span).await
    }

    async fn ask_inner(
        &self,
        question: &str,
        options: &AskOptions,
    ) -> Result<Vec<AskRecord>, PipelineError> {
        tracing::info!("question: {}", question);

        // Step 0: candidate recall (lexical, optionally semantic).
        let tokens = tokenize(question);
        let scored = auto_select_tables(&self.schema, &tokens, BASE_TOPK);
        let mut candidate_tables: Vec<String> = scored.iter().map(|(n, _)| n.clone()).collect();

        if options.use_semantic && let Some(retriever) = &self.semantic {
            match retriever.suggest(question).await {
                Ok(suggestion) => {
                    candidate_tables =
                        merge_candidates(&scored, &suggestion.tables, MAX_CANDIDATE_TABLES);
                }
                Err(e) => tracing::warn!("semantic retrieval failed: {}", e),
            }
        }
        candidate_tables.truncate(MAX_CANDIDATE_TABLES);
        tracing::info!("candidate tables: {:?}", candidate_tables);

        let effective_schema = self.schema.filter(&candidate_tables);
        let colmap = select_columns(
            &effective_schema,
            &candidate_tables,
            &tokens,
            COLUMNS_PER_TABLE,
        );
        let kb_snippet = self.kb.snippet(&candidate_tables, KB_SNIPPET_CHARS);

        // Step 1: planner (LLM call #1).
        let planner = Planner::new(self.chat.as_ref(), self.config.llm.temperature_planner);
        let plan = planner
            .plan(question, &kb_snippet, &effective_schema, &candidate_tables, &colmap)
            .await?;

        // Step 2: apply the plan back onto the context.
        let table_names = merge_plan_tables(&plan, &self.schema, &candidate_tables);
        let effective_schema = self.schema.filter(&table_names);

        let mut selected_columns = colmap;
        reorder_by_projection(
            &mut selected_columns,
            &plan.should_projection,
            REORDERED_COLUMNS_CAP,
        );
        let missing_tables: Vec<String> = table_names
            .iter()
            .filter(|t| !selected_columns.contains_key(*t))
            .cloned()
            .collect();
        if !missing_tables.is_empty() {
            let extra = select_columns(
                &effective_schema,
                &missing_tables,
                &tokens,
                REORDERED_COLUMNS_CAP,
            );
            selected_columns.extend(extra);
        }
        ensure_contract_columns(&plan, &mut selected_columns);

        // Step 3: safety contract.
        let contract = SafetyContract::from_plan(&plan, &effective_schema, selected_columns);
        tracing::debug!(
            "contract: {} allowed tables, {} MUST predicates",
            contract.allowed_tables.len(),
            contract.must_predicates.len()
        );

        // Step 4: generator (LLM call #2).
        let generator = Generator::new(self.chat.as_ref(), self.config.llm.temperature_generator);
        let plan_json = serde_json::to_string(&plan).map_err(LlmError::from)?;
        let n_candidates = options.sql_topk.max(3);
        let candidates = generator
            .generate(question, &plan_json, &contract, n_candidates)
            .await?;
        if candidates.is_empty() {
            tracing::warn!("generator returned no candidates, falling back");
            return self.ask_traditional(question).await;
        }

        // Step 5: objective validation and deterministic selection.
        let Some(best) = validate_and_select_best(&candidates, &contract) else {
            tracing::warn!("all candidates rejected by MUST validation, falling back");
            return self.ask_traditional(question).await;
        };
        tracing::info!(
            "selected candidate{}",
            if best.repaired { " (repaired)" } else { "" }
        );

        // Step 6: SQL guard.
        let guard_options = self.guard_options(plan.task == crate::models::Task::Trend);
        let final_sql = match guard::validate_and_rewrite(
            &best.sql,
            &effective_schema,
            Some(&contract.allowed_columns),
            &guard_options,
        ) {
            Ok(sql) => sql,
            Err(e) => {
                tracing::warn!("guard rejected the selected SQL ({}), falling back", e);
                return self.ask_traditional(question).await;
            }
        };
        tracing::info!("final SQL: {}", final_sql);

        let mut records = vec![AskRecord {
            question: question.to_string(),
            sql: final_sql,
            method: "two_call_clean".to_string(),
            repaired: Some(best.repaired),
            plan: Some(plan.clone()),
        }];
        self.append_additional_candidates(
            question,
            &candidates,
            &effective_schema,
            &contract,
            &guard_options,
            options.sql_topk,
            &mut records,
        );

        Ok(records)
    }

    /// Traditional single-shot fallback with lexical-only table
    /// selection; output still passes the guard.
    async fn ask_traditional(&self, question: &str) -> Result<Vec<AskRecord>, PipelineError> {
        tracing::warn!("falling back to traditional single-shot generation");

        let tokens = tokenize(question);
        let scored = auto_select_tables(&self.schema, &tokens, FALLBACK_TOPK);
        let table_names: Vec<String> = scored
            .iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(n, _)| n.clone())
            .collect();
        if table_names.is_empty() {
            return Err(PipelineError::NoRelevantTables);
        }

        let effective_schema = self.schema.filter(&table_names);
        let selected_columns = select_columns(
            &effective_schema,
            &table_names,
            &tokens,
            REORDERED_COLUMNS_CAP,
        );
        let allowed_columns = allowed_columns_listing(&selected_columns);
        let evidence = build_evidence(question, &table_names, &effective_schema).join("\n");

        let sql = generate_single_shot(
            self.chat.as_ref(),
            question,
            &effective_schema,
            &allowed_columns,
            "",
            &evidence,
        )
        .await?;
        if sql.trim().is_empty() {
            return Err(PipelineError::NoResult);
        }

        let guard_options = self.guard_options(false);
        let final_sql =
            guard::validate_and_rewrite(&sql, &effective_schema, None, &guard_options).map_err(
                |e| {
                    tracing::warn!("guard rejected fallback SQL: {}", e);
                    PipelineError::NoResult
                },
            )?;
        tracing::info!("final SQL (traditional): {}", final_sql);

        Ok(vec![AskRecord {
            question: question.to_string(),
            sql: final_sql,
            method: "traditional".to_string(),
            repaired: None,
            plan: None,
        }])
    }

    /// Guard the remaining generator candidates for `--sql-topk > 1`;
    /// failures are skipped silently.
    #[allow(clippy::too_many_arguments)]
    fn append_additional_candidates(
        &self,
        question: &str,
        candidates: &[SqlCandidate],
        effective_schema: &MSchema,
        contract: &SafetyContract,
        guard_options: &GuardOptions,
        sql_topk: usize,
        records: &mut Vec<AskRecord>,
    ) {
        if sql_topk <= 1 {
            return;
        }
        for candidate in candidates.iter().skip(1).take(sql_topk - 1) {
            match guard::validate_and_rewrite(
                &candidate.sql,
                effective_schema,
                Some(&contract.allowed_columns),
                guard_options,
            ) {
                Ok(sql) => records.push(AskRecord {
                    question: question.to_string(),
                    sql,
                    method: "additional_candidate".to_string(),
                    repaired: None,
                    plan: None,
                }),
                Err(e) => tracing::debug!("additional candidate rejected: {}", e),
            }
        }
    }

    fn guard_options(&self, keep_order_by: bool) -> GuardOptions {
        GuardOptions {
            max_limit: self.config.guard.max_limit,
            keep_order_by,
            permissive: self.config.guard.permissive,
            extra_aliases: self.config.guard.permitted_aliases.clone(),
        }
    }
}
