//! Knowledge-base catalog model
//!
//! Optional per-table enrichment (`kb_catalog.json`): human purpose,
//! alias keywords, frequent values. Every field is optional; tables
//! without a KB entry are fine.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbCatalog {
    #[serde(default)]
    pub tables: Vec<KbTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbTable {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub good_for: Vec<String>,
    #[serde(default)]
    pub top_values: Vec<String>,
    #[serde(default)]
    pub columns: Vec<KbColumn>,
    /// Frequent literal values per column, as `[value, count]` pairs.
    #[serde(default)]
    pub topn_columns: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbColumn {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub top_values: Vec<String>,
}

/// Per-table markdown cap inside a snippet.
const TABLE_SNIPPET_CHARS: usize = 1000;

impl KbCatalog {
    /// Load the catalog; a missing file yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                "KB catalog not found at {}, continuing without KB",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let catalog: Self = serde_json::from_str(&content)?;
        tracing::debug!("Loaded KB catalog with {} tables", catalog.tables.len());
        Ok(catalog)
    }

    pub fn table(&self, name: &str) -> Option<&KbTable> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Concatenated per-table markdown for the planner prompt.
    ///
    /// Each table's rendering is capped at 1000 chars, the whole snippet
    /// at `max_chars`.
    pub fn snippet(&self, table_names: &[String], max_chars: usize) -> String {
        let mut parts = Vec::new();
        for name in table_names {
            if let Some(entry) = self.table(name) {
                let md = entry.to_markdown();
                if !md.is_empty() {
                    parts.push(truncate_chars(&md, TABLE_SNIPPET_CHARS));
                }
            }
        }
        truncate_chars(&parts.join("\n\n"), max_chars)
    }
}

impl KbTable {
    /// Markdown excerpt of this entry for LLM context.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("## Table {}\n", self.name);
        if !self.purpose.is_empty() {
            out.push_str(&self.purpose);
            out.push('\n');
        }
        if !self.aliases.is_empty() {
            out.push_str(&format!("Aliases: {}\n", self.aliases.join(", ")));
        }
        if !self.good_for.is_empty() {
            out.push_str(&format!("Good for: {}\n", self.good_for.join("; ")));
        }
        for col in &self.columns {
            if col.desc.is_empty() && col.aliases.is_empty() && col.top_values.is_empty() {
                continue;
            }
            out.push_str(&format!("- {}: {}", col.name, col.desc));
            if !col.aliases.is_empty() {
                out.push_str(&format!(" ({})", col.aliases.join(", ")));
            }
            if !col.top_values.is_empty() {
                out.push_str(&format!(" [values: {}]", col.top_values.join(", ")));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Char-boundary-safe truncation (snippets carry CJK text).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
