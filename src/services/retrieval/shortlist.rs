//! Lexical table shortlister
//!
//! Scores every schema table against the expanded question tokens and
//! keeps a dynamic top-K. Pure objective matching: exact-name hits
//! dominate, common column names are down-weighted so they cannot drag
//! unrelated tables in. Never fails; an empty shortlist is allowed.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::models::{MSchema, TableSchema};

use super::tokenizer::{
    SEMANTIC_MAP, STATISTICAL_INDICATORS, THREAT_INDICATORS, expand_tokens,
};

/// Column names too generic to signal table relevance.
static COMMON_COLUMNS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "id", "name", "value", "key", "type", "status", "time", "date",
        "create_time", "update_time", "start_time", "end_time", "level",
    ]
    .into_iter()
    .collect()
});

/// Default shortlist width before dynamic widening.
pub const BASE_TOPK: usize = 8;

/// Score one table against the question tokens.
pub fn score_table(table: &TableSchema, tokens: &[String]) -> f64 {
    let name = table.name.to_lowercase();
    let extended = expand_tokens(tokens);
    let extended_set: HashSet<&str> = extended.iter().map(String::as_str).collect();
    let mut score: f64 = 0.0;

    // Exact table-name match dominates.
    if !name.is_empty() && extended_set.contains(name.as_str()) {
        score += 10.0;
    }

    // Table-name segments, e.g. "threat" hitting "threat_domain_static".
    for part in name.split('_') {
        if !part.is_empty() && extended_set.contains(part) {
            score += 5.0;
        }
    }

    // Substring containment; short tokens are too noisy to count.
    for tk in &extended {
        if tk.len() > 2 && name.contains(tk.as_str()) {
            score += 1.0;
        }
    }

    // Semantic-map translations present in the table name, counted once
    // per original token.
    let mut semantic_matches = 0;
    for token in tokens {
        if let Some(mapped) = SEMANTIC_MAP.get(token.as_str())
            && mapped.iter().any(|m| name.contains(m))
        {
            semantic_matches += 1;
        }
    }
    if semantic_matches >= 2 {
        score += 8.0;
    } else if semantic_matches >= 1 {
        score += 4.0;
    }

    // Statistical questions prefer statistics tables.
    let is_statistical = tokens
        .iter()
        .any(|t| STATISTICAL_INDICATORS.contains(&t.as_str()));
    if is_statistical && name.contains("statistics") {
        score += 20.0;
        tracing::debug!("statistical question boost for table {}", name);
    }

    // Threat questions prefer dedicated threat tables.
    let is_threat = tokens
        .iter()
        .any(|t| THREAT_INDICATORS.contains(&t.as_str()));
    if is_threat && ["threat", "malicious", "blacklist"].iter().any(|w| name.contains(w)) {
        score += 10.0;
    }

    // Column-name contribution; common columns barely count and their
    // partial matches are penalized.
    for col in &table.columns {
        let cname = col.name.to_lowercase();
        let is_common = COMMON_COLUMNS.contains(cname.as_str());
        for tk in &extended {
            if tk.is_empty() || !cname.contains(tk.as_str()) {
                continue;
            }
            if *tk == cname {
                score += if is_common { 0.1 } else { 2.0 };
            } else if !is_common {
                score += 0.5;
            } else {
                score -= 0.9;
            }
        }
    }

    // Priority booster so exact table-name hits sort first.
    for tk in &extended {
        if *tk == name {
            score += 15.0;
        }
    }

    score.max(0.0)
}

/// Rank all tables and keep a dynamic top-K.
///
/// Base K = 8; an exact-name hit (max score >= 10) widens the shortlist
/// by 4, two or more high scorers (>= 5) by another 2.
pub fn auto_select_tables(
    schema: &MSchema,
    tokens: &[String],
    topk: usize,
) -> Vec<(String, f64)> {
    let mut scored: Vec<(String, f64)> = schema
        .tables
        .iter()
        .map(|t| (t.name.clone(), score_table(t, tokens)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut dynamic_topk = topk;
    let max_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
    if max_score >= 10.0 {
        dynamic_topk += 4;
        tracing::debug!(
            "exact table-name hit (score {:.1}), widening shortlist to {}",
            max_score,
            dynamic_topk
        );
    }
    let high_score_count = scored.iter().filter(|(_, s)| *s >= 5.0).count();
    if high_score_count >= 2 {
        dynamic_topk += 2;
        tracing::debug!(
            "{} high-score tables, widening shortlist to {}",
            high_score_count,
            dynamic_topk
        );
    }

    scored.truncate(dynamic_topk.max(1));
    scored
}
