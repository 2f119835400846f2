//! LLM stage unit tests
//!
//! All tests script the model through a mock `ChatApi`; no network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::*;
use crate::models::{ColumnSchema, MSchema, SafetyContract, TableSchema, Task};

/// Scripted chat backend: returns queued responses in order.
pub(crate) struct MockChat {
    responses: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

impl MockChat {
    pub(crate) fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| (*s).to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for MockChat {
    async fn chat(
        &self,
        _system: Option<&str>,
        _user: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ApiError("no scripted response left".to_string()))
    }
}

fn column(name: &str) -> ColumnSchema {
    ColumnSchema { name: name.to_string(), ..Default::default() }
}

fn effective_schema() -> MSchema {
    MSchema {
        tables: vec![
            TableSchema {
                name: "weak_password_app".to_string(),
                columns: ["app_id", "name"].iter().map(|c| column(c)).collect(),
                ..Default::default()
            },
            TableSchema {
                name: "weak_password_app_detail".to_string(),
                columns: ["app_id", "pass_wd", "level"].iter().map(|c| column(c)).collect(),
                ..Default::default()
            },
        ],
    }
}

fn colmap() -> BTreeMap<String, Vec<String>> {
    BTreeMap::new()
}

const GOOD_PLAN: &str = r#"{
  "task": "list",
  "subject": "app",
  "risk": ["weak_password"],
  "must_tables": ["weak_password_app", "weak_password_app_detail"],
  "must_joins": ["weak_password_app_detail.app_id = weak_password_app.app_id"],
  "must_predicates": ["weak_password_app_detail.pass_wd IS NOT NULL"],
  "confidence": 0.95
}"#;

mod extract_tests {
    use super::*;

    #[test]
    fn test_extract_json_object_from_fenced_response() {
        let raw = "Here is the plan:\n```json\n{\"task\": \"list\"}\n```\ndone";
        assert_eq!(extract_json_object(raw), Some("{\"task\": \"list\"}"));
    }

    #[test]
    fn test_extract_json_object_none_without_braces() {
        assert_eq!(extract_json_object("no json here"), None);
    }
}

mod planner_tests {
    use super::*;

    #[tokio::test]
    async fn test_planner_parses_clean_plan() {
        let chat = MockChat::new(&[GOOD_PLAN]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("哪些应用存在弱口令?", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();

        assert_eq!(plan.task, Task::List);
        assert_eq!(plan.must_tables.len(), 2);
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_planner_bad_json_yields_default_plan() {
        let chat = MockChat::new(&["sorry, I cannot help with that"]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.task, Task::List);
    }

    #[tokio::test]
    async fn test_planner_unknown_task_tag_yields_default_plan() {
        let chat = MockChat::new(&[r#"{"task": "explode", "subject": "app"}"#]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_planner_retries_once_on_unknown_table() {
        let bad_plan = r#"{
          "task": "list",
          "subject": "app",
          "must_tables": ["ghost_table"],
          "must_predicates": ["ghost_table.x IS NOT NULL"]
        }"#;
        let chat = MockChat::new(&[bad_plan, GOOD_PLAN]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();

        // Exactly one retry, and the retry's plan is used.
        assert_eq!(chat.call_count(), 2);
        assert_eq!(plan.must_tables.len(), 2);
    }

    #[tokio::test]
    async fn test_planner_retry_keeps_filtered_plan_when_no_json() {
        let bad_plan = r#"{
          "task": "list",
          "subject": "app",
          "must_tables": ["weak_password_app", "ghost_table"]
        }"#;
        let chat = MockChat::new(&[bad_plan, "still no json"]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();

        assert_eq!(chat.call_count(), 2);
        // The filtered first plan survives.
        assert_eq!(plan.must_tables, vec!["weak_password_app"]);
    }

    #[tokio::test]
    async fn test_planner_no_second_retry() {
        let bad_plan = r#"{
          "task": "list",
          "subject": "app",
          "must_predicates": ["ghost_table.x IS NOT NULL"]
        }"#;
        // The retry still references an unknown table; no further call
        // may be made.
        let chat = MockChat::new(&[bad_plan, bad_plan]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();

        assert_eq!(chat.call_count(), 2);
        // Unfiltered unknown references are left for the guard.
        assert_eq!(plan.must_predicates, vec!["ghost_table.x IS NOT NULL"]);
    }

    #[tokio::test]
    async fn test_planner_accepts_legacy_field_names() {
        let legacy = r#"{
          "task": "list",
          "subject": "app",
          "required_tables": ["weak_password_app"],
          "required_predicates": ["weak_password_app.name IS NOT NULL"]
        }"#;
        let chat = MockChat::new(&[legacy]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();
        assert_eq!(plan.must_tables, vec!["weak_password_app"]);
        assert_eq!(plan.must_predicates.len(), 1);
    }

    #[tokio::test]
    async fn test_planner_propagates_transport_errors() {
        let chat = MockChat::new(&[]);
        let planner = Planner::new(&chat, 0.1);
        let result = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await;
        assert!(matches!(result, Err(LlmError::ApiError(_))));
    }

    #[tokio::test]
    async fn test_planner_clamps_confidence() {
        let chat = MockChat::new(&[r#"{"task": "list", "subject": "app", "confidence": 3.5}"#]);
        let planner = Planner::new(&chat, 0.1);
        let plan = planner
            .plan("q", "", &effective_schema(), &[], &colmap())
            .await
            .unwrap();
        assert!((plan.confidence - 1.0).abs() < f64::EPSILON);
    }
}

mod generator_tests {
    use super::*;

    fn contract() -> SafetyContract {
        SafetyContract {
            allowed_tables: vec!["weak_password_app".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generator_parses_candidates() {
        let response = r#"{
          "candidates": [
            {"label": "a", "sql": "SELECT name FROM weak_password_app LIMIT 200",
             "checks": [{"name": "must_predicates_present", "pass": true}],
             "confidence": 0.9},
            {"label": "b", "sql": "SELECT app_id FROM weak_password_app LIMIT 200"}
          ]
        }"#;
        let chat = MockChat::new(&[response]);
        let generator = Generator::new(&chat, 0.2);
        let candidates = generator
            .generate("q", "{}", &contract(), 3)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].label, "a");
        assert_eq!(candidates[0].checks.len(), 1);
        // Defaults fill the tolerant entry.
        assert!(candidates[1].checks.is_empty());
        assert!(!candidates[1].repaired);
    }

    #[tokio::test]
    async fn test_generator_empty_on_garbage() {
        let chat = MockChat::new(&["not json at all"]);
        let generator = Generator::new(&chat, 0.2);
        let candidates = generator.generate("q", "{}", &contract(), 3).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_generator_empty_candidates_array() {
        let chat = MockChat::new(&[r#"{"candidates": []}"#]);
        let generator = Generator::new(&chat, 0.2);
        let candidates = generator.generate("q", "{}", &contract(), 3).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_generator_skips_entries_without_sql() {
        let response = r#"{
          "candidates": [
            {"label": "no sql"},
            {"label": "ok", "sql": "SELECT name FROM weak_password_app"}
          ]
        }"#;
        let chat = MockChat::new(&[response]);
        let generator = Generator::new(&chat, 0.2);
        let candidates = generator.generate("q", "{}", &contract(), 3).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label, "ok");
    }
}

mod single_shot_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_shot_strips_sql_fence() {
        let chat = MockChat::new(&["```sql\nSELECT name FROM weak_password_app\n```"]);
        let sql = generate_single_shot(&chat, "q", &effective_schema(), "", "", "")
            .await
            .unwrap();
        assert_eq!(sql, "SELECT name FROM weak_password_app");
    }

    #[tokio::test]
    async fn test_single_shot_passes_plain_text_through() {
        let chat = MockChat::new(&["SELECT 1 WHERE 1 = 0"]);
        let sql = generate_single_shot(&chat, "q", &effective_schema(), "", "", "")
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1 WHERE 1 = 0");
    }
}
