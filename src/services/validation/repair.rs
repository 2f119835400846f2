//! Minimal repair
//!
//! When a candidate misses MUST predicate atoms, the repairer injects the
//! missing atoms into its WHERE clause and hands the result back for
//! re-validation. Tables, joins and column violations are never repaired.

use once_cell::sync::Lazy;
use regex::Regex;

use sqlparser::ast::{BinaryOperator, Expr, SetExpr};

use crate::models::SafetyContract;

use super::ast::{collect_select_facts, parse_expression, parse_statement, top_query_mut};
use super::normalize::{atom_present, decompose_predicate_to_atoms};

static TABLE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+\.").unwrap());
static WHERE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhere\b").unwrap());
static CLAUSE_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bgroup\s+by\b|\border\s+by\b|\blimit\b").unwrap());

/// Attempt the single minimal repair. Returns the rewritten SQL, or
/// `None` when there is nothing to inject (the caller then rejects the
/// candidate on re-validation grounds alone).
pub fn minimal_repair(sql: &str, contract: &SafetyContract) -> Option<String> {
    if contract.must_predicates.is_empty() {
        return None;
    }

    let missing = match parse_statement(sql) {
        Ok(statement) => {
            let facts = collect_select_facts(&statement);
            let mut missing = Vec::new();
            for predicate in &contract.must_predicates {
                for atom in decompose_predicate_to_atoms(predicate) {
                    if !atom_present(&facts.where_conditions, &atom) {
                        missing.push(atom);
                    }
                }
            }
            missing
        }
        // Unparseable SQL: fall back to whole-predicate string matching.
        Err(e) => {
            tracing::debug!("repair falling back to string matching: {}", e);
            let sql_lower = sql.to_lowercase();
            contract
                .must_predicates
                .iter()
                .filter(|p| {
                    let core = TABLE_PREFIX_RE.replace_all(&p.to_lowercase(), "").to_string();
                    !sql_lower.contains(&core)
                })
                .cloned()
                .collect()
        }
    };

    if missing.is_empty() {
        return None;
    }
    tracing::debug!("injecting {} missing predicate atom(s)", missing.len());
    Some(inject_missing_predicates(sql, &missing))
}

/// Conjoin `predicates` into the statement's WHERE clause, preferring an
/// AST rewrite and falling back to a string splice.
pub fn inject_missing_predicates(sql: &str, predicates: &[String]) -> String {
    if predicates.is_empty() {
        return sql.to_string();
    }

    if let Some(rewritten) = try_ast_injection(sql, predicates) {
        return rewritten;
    }

    let clause = predicates
        .iter()
        .map(|p| format!("({})", p))
        .collect::<Vec<_>>()
        .join(" AND ");

    if WHERE_RE.is_match(sql) {
        return WHERE_RE
            .replace(sql, format!("WHERE {} AND ", clause).as_str())
            .to_string();
    }

    match CLAUSE_BOUNDARY_RE.find(sql) {
        Some(m) => {
            let (head, tail) = sql.split_at(m.start());
            format!("{} WHERE {} {}", head.trim_end(), clause, tail)
        }
        None => format!("{} WHERE {}", sql.trim_end(), clause),
    }
}

fn try_ast_injection(sql: &str, predicates: &[String]) -> Option<String> {
    let mut statement = parse_statement(sql).ok()?;
    let query = top_query_mut(&mut statement)?;
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };

    let mut atoms = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        atoms.push(parse_expression(predicate).ok()?);
    }

    // Nest the existing selection so an OR inside it cannot change
    // precedence once the atoms are conjoined.
    let mut combined = match select.selection.take() {
        Some(existing) => Expr::Nested(Box::new(existing)),
        None => atoms.remove(0),
    };
    for atom in atoms {
        combined = Expr::BinaryOp {
            left: Box::new(combined),
            op: BinaryOperator::And,
            right: Box::new(atom),
        };
    }
    select.selection = Some(combined);

    Some(statement.to_string())
}
