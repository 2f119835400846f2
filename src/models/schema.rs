//! M-Schema model
//!
//! The exported database schema (`m_schema.json`) consumed by the pipeline.
//! Identifier comparison is case-insensitive; the canonical form is
//! lowercase unquoted.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Full schema export: the set of tables visible to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MSchema {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub col_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

impl MSchema {
    /// Load the schema export from disk.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let schema: Self = serde_json::from_str(&content)?;
        tracing::debug!("Loaded m_schema with {} tables", schema.tables.len());
        Ok(schema)
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Subset of the schema restricted to `names`, preserving schema order.
    pub fn filter(&self, names: &[String]) -> Self {
        let tables = self
            .tables
            .iter()
            .filter(|t| names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)))
            .cloned()
            .collect();
        Self { tables }
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
