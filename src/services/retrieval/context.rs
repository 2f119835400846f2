//! Schema/KB context builder
//!
//! Reduces the schema to the candidate tables, selects the most relevant
//! columns per table, and applies the plan back onto the context before
//! the safety contract is built.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{MSchema, Plan};

/// Union cap for lexical + semantic table candidates.
pub const MAX_CANDIDATE_TABLES: usize = 12;

/// Columns surfaced per table in the planner/generator context.
pub const COLUMNS_PER_TABLE: usize = 15;

static TABLE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.").unwrap());

static TABLE_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b").unwrap()
});

/// Keyword-scored column selection: name matches count full, comment
/// matches 0.3x. Top N per table, schema order on ties.
pub fn select_columns(
    effective_schema: &MSchema,
    table_names: &[String],
    tokens: &[String],
    topk_per_table: usize,
) -> BTreeMap<String, Vec<String>> {
    let mut selected = BTreeMap::new();

    for tname in table_names {
        let Some(table) = effective_schema.table(tname) else {
            continue;
        };
        let mut scored: Vec<(f64, String)> = table
            .columns
            .iter()
            .map(|c| {
                let lc = c.name.to_lowercase();
                let comment = c.comment.to_lowercase();
                let mut score = 0.0;
                for tk in tokens {
                    if tk.is_empty() {
                        continue;
                    }
                    if lc.contains(tk.as_str()) {
                        score += 1.0;
                    }
                    if comment.contains(tk.as_str()) {
                        score += 0.3;
                    }
                }
                (score, c.name.clone())
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let top: Vec<String> = scored
            .into_iter()
            .take(topk_per_table.max(1))
            .map(|(_, n)| n)
            .collect();
        selected.insert(table.name.clone(), top);
    }

    selected
}

/// Merge the plan's table requirements into the candidate list.
///
/// Adds `must_tables` and every `table.` prefix found in MUST
/// predicates/joins, restricted to tables that actually exist in the
/// schema. Candidate order is preserved; inferred tables are appended in
/// sorted order for determinism.
pub fn merge_plan_tables(plan: &Plan, schema: &MSchema, candidates: &[String]) -> Vec<String> {
    let mut tables = candidates.to_vec();
    let mut push = |name: &str, tables: &mut Vec<String>| {
        if schema.contains_table(name) && !tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            tables.push(name.to_string());
        }
    };

    for t in &plan.must_tables {
        push(t, &mut tables);
    }

    let mut inferred: Vec<String> = plan
        .must_predicates
        .iter()
        .chain(plan.must_joins.iter())
        .flat_map(|text| {
            TABLE_PREFIX_RE
                .captures_iter(text)
                .map(|c| c[1].to_string())
                .collect::<Vec<_>>()
        })
        .filter(|t| schema.contains_table(t))
        .collect();
    inferred.sort();
    inferred.dedup();
    for t in inferred {
        push(&t, &mut tables);
    }

    tables
}

/// Re-order selected columns so the plan's preferred projection comes
/// first, capping each table at `cap` columns.
pub fn reorder_by_projection(
    selected: &mut BTreeMap<String, Vec<String>>,
    should_projection: &[String],
    cap: usize,
) {
    if should_projection.is_empty() {
        return;
    }
    for (table, cols) in selected.iter_mut() {
        let mut priority: Vec<String> = Vec::new();
        for wanted in should_projection {
            // Accept both "table.column" and bare "column" forms.
            let col = match wanted.split_once('.') {
                Some((t, c)) if t.eq_ignore_ascii_case(table) => c,
                Some(_) => continue,
                None => wanted.as_str(),
            };
            if let Some(found) = cols.iter().find(|c| c.eq_ignore_ascii_case(col))
                && !priority.contains(found)
            {
                priority.push(found.clone());
            }
        }
        let rest: Vec<String> = cols
            .iter()
            .filter(|c| !priority.contains(*c))
            .cloned()
            .collect();
        priority.extend(rest);
        priority.truncate(cap);
        *cols = priority;
    }
}

/// Whitelist every `table.column` referenced by MUST
/// predicates/joins/groupby/aggregates so the contract cannot reject its
/// own constraints.
pub fn ensure_contract_columns(plan: &Plan, selected: &mut BTreeMap<String, Vec<String>>) {
    for fragment in plan.constraint_fragments() {
        for caps in TABLE_COLUMN_RE.captures_iter(fragment) {
            let table = &caps[1];
            let column = &caps[2];
            if let Some(cols) = selected.get_mut(table)
                && !cols.iter().any(|c| c.eq_ignore_ascii_case(column))
            {
                cols.push(column.to_string());
            }
        }
    }
}

/// `table: col1, col2, ...` listing for the single-shot fallback prompt.
pub fn allowed_columns_listing(selected: &BTreeMap<String, Vec<String>>) -> String {
    let mut lines = Vec::new();
    for (table, cols) in selected {
        if cols.is_empty() {
            continue;
        }
        let shown: Vec<&str> = cols.iter().take(COLUMNS_PER_TABLE).map(String::as_str).collect();
        lines.push(format!("{}: {}", table, shown.join(", ")));
    }
    lines.join("\n")
}

/// Base evidence for the fallback prompt: a time-filter hint and the
/// foreign-key joins available among the candidate tables.
pub fn build_evidence(question: &str, table_names: &[String], effective_schema: &MSchema) -> Vec<String> {
    let mut parts = Vec::new();

    let q_lower = question.to_lowercase();
    if ["最近", "近", "过去", "last", "recent"].iter().any(|k| q_lower.contains(k)) {
        parts.push("Time filter hint: use DATE_SUB or INTERVAL syntax".to_string());
    }

    let mut fks = Vec::new();
    for table in &effective_schema.tables {
        if !table_names.iter().any(|n| n.eq_ignore_ascii_case(&table.name)) {
            continue;
        }
        for fk in &table.foreign_keys {
            if table_names.iter().any(|n| n.eq_ignore_ascii_case(&fk.ref_table)) {
                fks.push(format!(
                    "{}.{} = {}.{}",
                    table.name, fk.column, fk.ref_table, fk.ref_column
                ));
            }
        }
    }
    if !fks.is_empty() {
        let shown: Vec<&str> = fks.iter().take(3).map(String::as_str).collect();
        parts.push(format!("Possible joins: {}", shown.join("; ")));
    }

    parts
}
