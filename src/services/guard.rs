//! SQL Guard - final safety rewrite
//!
//! Independent last line of defense over the chosen SQL, regardless of
//! what the LLM stages claimed: reject forbidden constructs, enforce the
//! table/column whitelist, strip ORDER BY outside trend questions, quote
//! reserved-like identifiers and apply the LIMIT policy. The statement is
//! round-tripped through parse-and-emit so anything unparseable is
//! rejected here at the latest.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::MSchema;

use super::validation::ast::{
    collect_select_facts, extract_used_columns, extract_used_tables, for_each_query_mut,
    is_single_row_aggregate, parse_statement, top_query_mut,
};
use super::validation::engine::contains_cjk;

/// Identifiers that collide with MySQL keywords and get backtick-quoted.
const RESERVED_LIKE: &[&str] = &["check", "desc", "key", "user"];

/// Derived aliases always permitted in addition to SELECT aliases.
pub const DEFAULT_DERIVED_ALIASES: &[&str] =
    &["d", "date", "cnt", "count", "total", "num", "dt", "day"];

pub const DEFAULT_MAX_LIMIT: u32 = 200;

static BLOCK_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static LINE_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--.*?$").unwrap());
static SELECT_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)select\s*\*").unwrap());
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)specific_\w+").unwrap());
static TRAILING_SEMICOLON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r";\s*$").unwrap());
static LIMIT_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\b").unwrap());
static LIMIT_CLAUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blimit\s*(\d+)(\s*,\s*(\d+))?").unwrap());
static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bINTERVAL\s+'(\d+)'\s+(SECOND|MINUTE|HOUR|DAY|WEEK|MONTH|QUARTER|YEAR)")
        .unwrap()
});
static QUOTED_ASC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)`\s*asc\s*`").unwrap());
static QUOTED_DESC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)`\s*desc\s*`").unwrap());

/// Rejection raised by the guard; the pipeline treats it as a fallback
/// signal.
#[derive(Debug, thiserror::Error)]
#[error("SQL guard rejected: {0}")]
pub struct GuardRejection(pub String);

/// Guard behavior knobs, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub max_limit: u32,
    /// ORDER BY survives only for trend questions.
    pub keep_order_by: bool,
    /// Permissive mode skips ORDER BY stripping and all LIMIT handling.
    pub permissive: bool,
    /// Extra derived aliases on top of the built-in set.
    pub extra_aliases: Vec<String>,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            keep_order_by: false,
            permissive: false,
            extra_aliases: Vec::new(),
        }
    }
}

impl GuardOptions {
    fn permitted_aliases(&self) -> BTreeSet<String> {
        DEFAULT_DERIVED_ALIASES
            .iter()
            .map(|a| (*a).to_string())
            .chain(self.extra_aliases.iter().map(|a| a.trim().to_lowercase()))
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// Validate and rewrite one SQL statement against the schema (and the
/// contract's column whitelist when provided).
pub fn validate_and_rewrite(
    sql: &str,
    m_schema: &MSchema,
    allowed_columns_by_table: Option<&BTreeMap<String, Vec<String>>>,
    options: &GuardOptions,
) -> Result<String, GuardRejection> {
    let sql = remove_comments(sql);

    if contains_cjk(&sql) {
        return Err(GuardRejection("SQL contains CJK text or placeholders".into()));
    }
    if PLACEHOLDER_RE.is_match(&sql) {
        return Err(GuardRejection("SQL contains example placeholders".into()));
    }
    if SELECT_STAR_RE.is_match(&sql) {
        return Err(GuardRejection("SELECT * is forbidden, list the needed columns".into()));
    }

    let mut statement =
        parse_statement(&sql).map_err(|e| GuardRejection(format!("SQL parse failed: {}", e)))?;
    if top_query_mut(&mut statement).is_none() {
        return Err(GuardRejection("only SELECT queries (incl. WITH/UNION) are allowed".into()));
    }

    let permitted_aliases = options.permitted_aliases();

    let allowed_tables: BTreeSet<String> = m_schema
        .tables
        .iter()
        .map(|t| t.name.to_lowercase())
        .collect();
    let mut table_to_columns: BTreeMap<String, BTreeSet<String>> = m_schema
        .tables
        .iter()
        .map(|t| {
            (
                t.name.to_lowercase(),
                t.columns.iter().map(|c| c.name.to_lowercase()).collect(),
            )
        })
        .collect();

    // Narrow each table's columns to the contract whitelist; tables the
    // contract does not mention keep their schema columns.
    if let Some(contract_columns) = allowed_columns_by_table {
        for (table, columns) in table_to_columns.iter_mut() {
            let narrowed: BTreeSet<String> = contract_columns
                .iter()
                .filter(|(t, _)| t.to_lowercase() == *table)
                .flat_map(|(_, cols)| cols.iter().map(|c| c.to_lowercase()))
                .collect();
            if !narrowed.is_empty() {
                *columns = columns.intersection(&narrowed).cloned().collect();
            }
        }
    }

    let used_tables = extract_used_tables(&statement);
    let unknown_tables: Vec<&String> =
        used_tables.iter().filter(|t| !allowed_tables.contains(*t)).collect();
    if !unknown_tables.is_empty() {
        return Err(GuardRejection(format!("unauthorized tables: {:?}", unknown_tables)));
    }

    let used_columns = extract_used_columns(&statement);
    if !used_columns.is_empty() {
        let all_allowed: BTreeSet<&String> = table_to_columns.values().flatten().collect();
        let facts = collect_select_facts(&statement);
        let unknown_columns: Vec<&String> = used_columns
            .iter()
            .filter(|c| !all_allowed.contains(c))
            .filter(|c| !facts.select_aliases.contains(*c))
            .filter(|c| !permitted_aliases.contains(*c))
            // ORDER BY positional numbers are not column references.
            .filter(|c| !c.chars().all(|ch| ch.is_ascii_digit()))
            .collect();
        if !unknown_columns.is_empty() {
            return Err(GuardRejection(format!("unauthorized columns: {:?}", unknown_columns)));
        }
    }

    if !options.permissive
        && !options.keep_order_by
        && let Some(query) = top_query_mut(&mut statement)
    {
        for_each_query_mut(query, &mut |q| q.order_by = None);
    }

    let norm_sql = string_fixups(&statement.to_string());

    // Permissive mode keeps the parse and whitelist checks but leaves
    // LIMIT handling to the caller.
    if options.permissive {
        return Ok(norm_sql);
    }

    // Single-row aggregates must not carry a LIMIT at all.
    if let Ok(mut reparsed) = parse_statement(&norm_sql)
        && let Some(query) = top_query_mut(&mut reparsed)
        && is_single_row_aggregate(query)
    {
        query.limit_clause = None;
        return Ok(string_fixups(&reparsed.to_string()));
    }

    if !LIMIT_WORD_RE.is_match(&norm_sql) {
        return Ok(format!("{} LIMIT {}", norm_sql, options.max_limit));
    }
    Ok(clamp_limit(&norm_sql, options.max_limit))
}

fn remove_comments(sql: &str) -> String {
    let sql = BLOCK_COMMENT_RE.replace_all(sql, " ");
    LINE_COMMENT_RE.replace_all(&sql, " ").trim().to_string()
}

fn string_fixups(sql: &str) -> String {
    let sql = TRAILING_SEMICOLON_RE.replace(sql.trim(), "").to_string();
    let sql = fix_interval_literals(&sql);
    let sql = quote_reserved_identifiers(&sql);
    unquote_order_directions(&sql)
}

/// `INTERVAL '30' DAY` -> `INTERVAL 30 DAY` (MySQL wants the bare number).
fn fix_interval_literals(sql: &str) -> String {
    INTERVAL_RE.replace_all(sql, "INTERVAL $1 $2").to_string()
}

/// Backtick-quote reserved-like identifiers outside quoted regions.
fn quote_reserved_identifiers(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_backtick = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '`' if !in_single && !in_double => in_backtick = !in_backtick,
            '\'' if !in_backtick && !in_double => in_single = !in_single,
            '"' if !in_backtick && !in_single => in_double = !in_double,
            _ => {}
        }

        if !in_backtick && !in_single && !in_double && (c.is_ascii_alphabetic() || c == '_') {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if RESERVED_LIKE.contains(&word.to_lowercase().as_str()) {
                out.push('`');
                out.push_str(&word);
                out.push('`');
            } else {
                out.push_str(&word);
            }
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

/// The reserved-identifier pass must not quote sort directions.
fn unquote_order_directions(sql: &str) -> String {
    let sql = QUOTED_ASC_RE.replace_all(sql, "ASC").to_string();
    QUOTED_DESC_RE.replace_all(&sql, "DESC").to_string()
}

/// Clamp `LIMIT n` / `LIMIT offset, n` counts to `max_limit`, preserving
/// any offset.
fn clamp_limit(sql: &str, max_limit: u32) -> String {
    LIMIT_CLAUSE_RE
        .replace_all(sql, |caps: &regex::Captures<'_>| {
            if let Some(count) = caps.get(3) {
                let offset: u64 = caps[1].parse().unwrap_or(0);
                let count: u64 = count.as_str().parse().unwrap_or(u64::from(max_limit));
                format!("LIMIT {}, {}", offset, count.min(u64::from(max_limit)))
            } else {
                let count: u64 = caps[1].parse().unwrap_or(u64::from(max_limit));
                format!("LIMIT {}", count.min(u64::from(max_limit)))
            }
        })
        .to_string()
}
