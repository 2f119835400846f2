//! Safety contract - the schema-scoped constraint set for the generator
//!
//! Built from Plan ∩ effective schema. The contract is the only source of
//! truth the generator prompt and the validation engine see: tables and
//! columns outside it are unauthorized by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::{Plan, Task};
use super::schema::MSchema;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyContract {
    pub allowed_tables: Vec<String>,
    /// Per-table column whitelist, narrower than the schema's columns.
    pub allowed_columns: BTreeMap<String, Vec<String>>,

    // MUST constraints (hard gates)
    pub must_tables: Vec<String>,
    pub must_joins: Vec<String>,
    pub must_predicates: Vec<String>,

    // SHOULD preferences
    pub should_predicates: Vec<String>,
    pub should_projection: Vec<String>,

    // MAY options
    pub may_predicates: Vec<String>,
    pub may_projection: Vec<String>,

    pub timeframe_days: Option<i64>,
    pub forbidden_clauses: Vec<String>,
}

impl SafetyContract {
    /// Derive the contract from a cleaned plan and the effective schema.
    ///
    /// `allowed_columns` must already include every column referenced by
    /// MUST predicates/joins/groupby/aggregates (see
    /// `retrieval::context::ensure_contract_columns`).
    pub fn from_plan(
        plan: &Plan,
        effective_schema: &MSchema,
        allowed_columns: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let allowed_tables = effective_schema.table_names();
        let in_schema = |t: &String| allowed_tables.iter().any(|a| a.eq_ignore_ascii_case(t));

        let forbidden_clauses = if plan.task == Task::Trend {
            Vec::new()
        } else {
            vec!["ORDER BY".to_string()]
        };

        Self {
            must_tables: plan
                .must_tables
                .iter()
                .filter(|t| in_schema(t))
                .cloned()
                .collect(),
            must_joins: plan.must_joins.clone(),
            must_predicates: plan.must_predicates.clone(),
            should_predicates: plan.should_predicates.clone(),
            should_projection: plan.should_projection.clone(),
            may_predicates: plan.may_predicates.clone(),
            may_projection: plan.may_projection.clone(),
            timeframe_days: plan.timeframe_days,
            allowed_tables,
            allowed_columns,
            forbidden_clauses,
        }
    }

    pub fn allows_table(&self, name: &str) -> bool {
        self.allowed_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(name))
    }
}
