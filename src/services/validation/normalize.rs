//! Predicate and join normalization
//!
//! Pure string functions used to compare required constraints against the
//! serialized conditions extracted from candidate SQL. These never parse
//! SQL; they only rewrite text into a canonical lowercase, prefix-free,
//! whitespace-collapsed form.

use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\.").unwrap());

static NOT_IS_NULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnot\s+([a-z_][a-z0-9_]*)\s+is\s+null\b").unwrap());

static NOT_IS_NOT_NULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnot\s+([a-z_][a-z0-9_]*)\s+is\s+not\s+null\b").unwrap());

static EQ_SPACING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*=\s*").unwrap());

/// Canonical form of a predicate for substring comparison.
///
/// Lowercase, table prefixes stripped, `NOT x IS NULL` folded to
/// `x IS NOT NULL` (and the converse), whitespace collapsed.
pub fn normalize_predicate(predicate: &str) -> String {
    let s = predicate.to_lowercase();
    let s = TABLE_PREFIX_RE.replace_all(&s, "");
    let s = NOT_IS_NULL_RE.replace_all(&s, "${1} is not null");
    let s = NOT_IS_NOT_NULL_RE.replace_all(&s, "${1} is null");
    collapse_whitespace(&s)
}

/// Canonical form of a join condition for substring comparison.
pub fn normalize_join_condition(join_condition: &str) -> String {
    let s = join_condition.to_lowercase();
    let s = TABLE_PREFIX_RE.replace_all(&s, "");
    let s = EQ_SPACING_RE.replace_all(&s, "=");
    collapse_whitespace(&s)
}

/// Split a compound predicate into atoms on top-level `AND`.
///
/// Parenthesized and quoted sections are opaque to the split; one pair of
/// wrapping parentheses is stripped per atom, and an unwrapped atom that
/// still contains a top-level `AND` is decomposed again.
pub fn decompose_predicate_to_atoms(predicate: &str) -> Vec<String> {
    let trimmed = predicate.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut atoms = Vec::new();
    for part in split_top_level_and(trimmed) {
        let mut s = part.trim().to_string();
        if s.starts_with('(') && s.ends_with(')') {
            s = s[1..s.len() - 1].trim().to_string();
            // The wrapper may have hidden further conjunctions.
            if split_top_level_and(&s).len() > 1 {
                atoms.extend(decompose_predicate_to_atoms(&s));
                continue;
            }
        }
        if !s.is_empty() {
            atoms.push(s);
        }
    }
    atoms
}

/// Does every atom of `required_predicate` appear (normalized, as a
/// substring) in some condition of `where_conditions`?
pub fn check_predicate_presence(where_conditions: &[String], required_predicate: &str) -> bool {
    let atoms = decompose_predicate_to_atoms(required_predicate);
    if atoms.is_empty() {
        return false;
    }
    atoms.iter().all(|atom| atom_present(where_conditions, atom))
}

/// Presence check for a single atom.
pub fn atom_present(where_conditions: &[String], atom: &str) -> bool {
    let atom_norm = normalize_predicate(atom);
    where_conditions
        .iter()
        .any(|cond| normalize_predicate(cond).contains(&atom_norm))
}

/// Is `required_join` present (normalized, as a substring) in any of the
/// extracted join conditions?
pub fn check_join_presence(join_conditions: &[String], required_join: &str) -> bool {
    let required_norm = normalize_join_condition(required_join);
    join_conditions
        .iter()
        .any(|join| normalize_join_condition(join).contains(&required_norm))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on the word `AND` (any case) at parenthesis depth zero, outside
/// string literals.
fn split_top_level_and(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => depth += 1,
            ')' if !in_single && !in_double => depth -= 1,
            _ => {}
        }

        let at_and = depth == 0
            && !in_single
            && !in_double
            && (c == 'a' || c == 'A')
            && i + 3 <= chars.len()
            && chars[i + 1].eq_ignore_ascii_case(&'n')
            && chars[i + 2].eq_ignore_ascii_case(&'d')
            && (i == 0 || !is_word_char(chars[i - 1]))
            && (i + 3 == chars.len() || !is_word_char(chars[i + 3]));

        if at_and {
            parts.push(current.clone());
            current.clear();
            i += 3;
            continue;
        }

        current.push(c);
        i += 1;
    }
    parts.push(current);
    parts
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
