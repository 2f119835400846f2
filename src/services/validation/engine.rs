//! Objective validation engine
//!
//! MUST constraints only: no semantic scoring, no ranking beyond the
//! deterministic tie-break. Every check is a boolean derived from the AST
//! facts; an unparseable candidate fails closed.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{SafetyContract, SqlCandidate};

use super::ast::{collect_select_facts, extract_used_columns, extract_used_tables, parse_statement};
use super::normalize::{check_join_presence, check_predicate_presence};
use super::repair::minimal_repair;

static SELECT_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)select\s*\*").unwrap());
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)specific_\w+").unwrap());
static JOIN_TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+)\.").unwrap());

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn pass() -> Self {
        Self { passed: true, errors: Vec::new() }
    }

    fn fail(errors: Vec<String>) -> Self {
        Self { passed: false, errors }
    }
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fa5}').contains(&c))
}

/// Cheap pre-checks before any constraint validation.
pub fn check_basic_sql_validity(sql: &str) -> ValidationOutcome {
    let mut errors = Vec::new();

    if SELECT_STAR_RE.is_match(sql) {
        errors.push("SELECT * is forbidden".to_string());
    }
    if contains_cjk(sql) {
        errors.push("SQL contains CJK text".to_string());
    }
    if PLACEHOLDER_RE.is_match(sql) {
        errors.push("SQL contains example placeholders".to_string());
    }
    if let Err(e) = parse_statement(sql) {
        errors.push(format!("SQL syntax error: {}", e));
    }

    if errors.is_empty() {
        ValidationOutcome::pass()
    } else {
        ValidationOutcome::fail(errors)
    }
}

/// Full MUST-constraint validation of one candidate against the contract.
pub fn validate_must_constraints(sql: &str, contract: &SafetyContract) -> ValidationOutcome {
    // Parse failure is a hard fail: never wave through SQL we cannot see.
    let statement = match parse_statement(sql) {
        Ok(statement) => statement,
        Err(e) => {
            return ValidationOutcome::fail(vec![format!("SQL parse failed: {}", e)]);
        }
    };

    let used_tables = extract_used_tables(&statement);
    let used_columns = extract_used_columns(&statement);
    let facts = collect_select_facts(&statement);
    tracing::debug!("extracted WHERE conditions: {:?}", facts.where_conditions);

    let mut errors = Vec::new();

    // MUST tables; when the contract carries none, fall back to the
    // tables mentioned in MUST joins (contract-scoped).
    let must_tables = if contract.must_tables.is_empty() {
        infer_tables_from_joins(contract)
    } else {
        contract.must_tables.clone()
    };
    for table in &must_tables {
        if !used_tables.contains(&table.to_lowercase()) {
            errors.push(format!("missing required table: {}", table));
        }
    }

    // MUST joins.
    for join in &contract.must_joins {
        if !check_join_presence(&facts.join_conditions, join) {
            errors.push(format!("missing required join: {}", join));
        }
    }

    // MUST predicates (compound predicates decompose on top-level AND).
    for predicate in &contract.must_predicates {
        let ok = check_predicate_presence(&facts.where_conditions, predicate);
        tracing::debug!("MUST predicate {:?} -> {}", predicate, ok);
        if !ok {
            errors.push(format!("missing required predicate: {}", predicate));
        }
    }

    // Allowed tables.
    for used in &used_tables {
        if !contract.allows_table(used) {
            errors.push(format!("unauthorized table: {}", used));
        }
    }

    // Allowed columns: union across tables; unqualified references pass
    // when any table allows them.
    let allowed_columns: BTreeSet<String> = contract
        .allowed_columns
        .values()
        .flatten()
        .map(|c| c.to_lowercase())
        .collect();
    for used in &used_columns {
        if !allowed_columns.contains(used) {
            errors.push(format!("unauthorized column: {}", used));
        }
    }

    if errors.is_empty() {
        ValidationOutcome::pass()
    } else {
        ValidationOutcome::fail(errors)
    }
}

fn infer_tables_from_joins(contract: &SafetyContract) -> Vec<String> {
    let mut inferred = BTreeSet::new();
    for join in &contract.must_joins {
        for caps in JOIN_TABLE_RE.captures_iter(join) {
            let table = caps[1].to_string();
            if contract.allows_table(&table) {
                inferred.insert(table);
            }
        }
    }
    inferred.into_iter().collect()
}

/// Keep only candidates that pass MUST validation, repairing once where
/// possible. Original order is preserved in the returned indices.
pub fn filter_candidates(
    candidates: &[SqlCandidate],
    contract: &SafetyContract,
) -> Vec<(usize, SqlCandidate)> {
    let mut valid = Vec::new();

    for (i, candidate) in candidates.iter().enumerate() {
        let sql = candidate.sql.trim();
        if sql.is_empty() {
            continue;
        }

        let basic = check_basic_sql_validity(sql);
        if !basic.passed {
            tracing::debug!("candidate {} failed basic checks: {:?}", i + 1, basic.errors);
            continue;
        }

        tracing::debug!("candidate {} SQL: {}", i + 1, sql);
        let outcome = validate_must_constraints(sql, contract);
        if outcome.passed {
            valid.push((i, candidate.clone()));
            continue;
        }
        tracing::debug!("candidate {} failed MUST checks: {:?}", i + 1, outcome.errors);

        let Some(repaired_sql) = minimal_repair(sql, contract) else {
            continue;
        };
        tracing::debug!("candidate {} repaired SQL: {}", i + 1, repaired_sql);
        let recheck = validate_must_constraints(&repaired_sql, contract);
        if recheck.passed {
            let mut repaired = candidate.clone();
            repaired.sql = repaired_sql;
            repaired.repaired = true;
            valid.push((i, repaired));
        } else {
            tracing::debug!(
                "candidate {} still failing after repair: {:?}",
                i + 1,
                recheck.errors
            );
        }
    }

    valid
}

/// Deterministic selection among passing candidates:
/// not-repaired first, then shortest SQL, then original order.
pub fn deterministic_selection(
    mut candidates: Vec<(usize, SqlCandidate)>,
) -> Option<SqlCandidate> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by_key(|(idx, c)| (c.repaired, c.sql.len(), *idx));
    Some(candidates.remove(0).1)
}

/// Main entry: validate every candidate and pick one, or signal fallback.
pub fn validate_and_select_best(
    candidates: &[SqlCandidate],
    contract: &SafetyContract,
) -> Option<SqlCandidate> {
    let valid = filter_candidates(candidates, contract);
    deterministic_selection(valid)
}
