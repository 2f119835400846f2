//! Plan model - structured output of the planner stage
//!
//! A `Plan` captures the question's intent as MUST/SHOULD/MAY tiers:
//! MUST entries are hard gates enforced by the validation engine, SHOULD
//! entries are ranking preferences for the generator, MAY entries are
//! informational. Unknown `task`/`subject` tags are a deserialization
//! error, which the planner maps to the default (empty) plan.

use serde::{Deserialize, Serialize};

/// Query shape implied by the question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    List,
    Count,
    Trend,
    Rank,
    Detail,
    Filter,
    Distribution,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Count => "count",
            Self::Trend => "trend",
            Self::Rank => "rank",
            Self::Detail => "detail",
            Self::Filter => "filter",
            Self::Distribution => "distribution",
        }
    }
}

/// Primary entity the question is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    #[default]
    App,
    Node,
    Account,
    User,
    Endpoint,
    Service,
    Process,
    Risk,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Node => "node",
            Self::Account => "account",
            Self::User => "user",
            Self::Endpoint => "endpoint",
            Self::Service => "service",
            Self::Process => "process",
            Self::Risk => "risk",
        }
    }
}

/// Structured execution plan with MUST/SHOULD/MAY tiers.
///
/// Legacy field names (`required_tables`, `required_joins`,
/// `required_predicates`, `projection_priority`) are accepted as aliases
/// and carry MUST semantics (resp. SHOULD projection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub task: Task,
    pub subject: Subject,
    pub risk: Vec<String>,

    // MUST constraints (hard requirements)
    #[serde(alias = "required_tables")]
    pub must_tables: Vec<String>,
    #[serde(alias = "required_joins")]
    pub must_joins: Vec<String>,
    #[serde(alias = "required_predicates")]
    pub must_predicates: Vec<String>,

    // SHOULD preferences (prioritized, not enforced)
    pub should_tables: Vec<String>,
    pub should_predicates: Vec<String>,
    #[serde(alias = "projection_priority")]
    pub should_projection: Vec<String>,

    // MAY options
    pub may_predicates: Vec<String>,
    pub may_projection: Vec<String>,

    pub timeframe_days: Option<i64>,
    pub groupby: Vec<String>,
    pub aggregates: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            task: Task::default(),
            subject: Subject::default(),
            risk: Vec::new(),
            must_tables: Vec::new(),
            must_joins: Vec::new(),
            must_predicates: Vec::new(),
            should_tables: Vec::new(),
            should_predicates: Vec::new(),
            should_projection: Vec::new(),
            may_predicates: Vec::new(),
            may_projection: Vec::new(),
            timeframe_days: None,
            groupby: Vec::new(),
            aggregates: Vec::new(),
            confidence: 0.8,
            reasoning: String::new(),
        }
    }
}

impl Plan {
    /// True when the plan carries no constraints at all (planner fallback).
    pub fn is_empty(&self) -> bool {
        self.must_tables.is_empty()
            && self.must_joins.is_empty()
            && self.must_predicates.is_empty()
            && self.should_tables.is_empty()
            && self.should_predicates.is_empty()
    }

    /// Every fragment that may carry `table.column` references.
    pub fn constraint_fragments(&self) -> impl Iterator<Item = &String> {
        self.must_predicates
            .iter()
            .chain(self.must_joins.iter())
            .chain(self.groupby.iter())
            .chain(self.aggregates.iter())
    }

    /// Clamp out-of-range values the model may emit.
    pub fn sanitize(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}
