//! Semantic retriever interface
//!
//! The dense-embedding index lives outside this crate; the pipeline only
//! depends on this trait and on the merge rule below. Implementations
//! return ranked tables and optionally a per-table column map.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Result of one semantic lookup.
#[derive(Debug, Clone, Default)]
pub struct SemanticSuggestion {
    pub tables: Vec<(String, f32)>,
    pub columns_by_table: BTreeMap<String, Vec<String>>,
}

/// External dense-retrieval collaborator.
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    async fn suggest(&self, question: &str) -> anyhow::Result<SemanticSuggestion>;
}

/// Merge lexical and semantic candidates.
///
/// Lexical order is preserved; semantic tables not already present are
/// appended in their ranked order. The union is capped at `cap`.
pub fn merge_candidates(
    lexical: &[(String, f64)],
    semantic: &[(String, f32)],
    cap: usize,
) -> Vec<String> {
    let mut merged: Vec<String> = lexical.iter().map(|(n, _)| n.clone()).collect();
    for (name, _) in semantic {
        if !merged.iter().any(|m| m.eq_ignore_ascii_case(name)) {
            merged.push(name.clone());
        }
    }
    merged.truncate(cap);
    merged
}
