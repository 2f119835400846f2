//! Data models crossing stage boundaries
//!
//! All records are immutable per-request values; the schema and KB
//! catalog are loaded once and shared read-only.

pub mod candidate;
pub mod contract;
pub mod kb;
pub mod plan;
pub mod schema;

pub use candidate::{CandidateCheck, SqlCandidate};
pub use contract::SafetyContract;
pub use kb::{KbCatalog, KbColumn, KbTable};
pub use plan::{Plan, Subject, Task};
pub use schema::{ColumnSchema, ForeignKey, MSchema, TableSchema};
