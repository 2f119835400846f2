//! Candidate model - one SQL string with self-check annotations
//!
//! The generator may return loosely shaped objects; everything except
//! `sql` is defaulted, so a bare `{"sql": "..."}` entry still parses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlCandidate {
    #[serde(default)]
    pub label: String,
    pub sql: String,
    #[serde(default)]
    pub checks: Vec<CandidateCheck>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Set by the validation engine after a successful minimal repair.
    #[serde(default)]
    pub repaired: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateCheck {
    pub name: String,
    #[serde(default)]
    pub pass: bool,
}

fn default_confidence() -> f64 {
    0.8
}

impl SqlCandidate {
    /// Tolerant conversion from a raw JSON value; `None` when the entry
    /// has no usable SQL.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let candidate: Self = serde_json::from_value(value).ok()?;
        if candidate.sql.trim().is_empty() {
            return None;
        }
        Some(candidate)
    }
}
