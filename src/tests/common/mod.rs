//! Shared test fixtures: scripted chat backend, EDR schema and KB.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::Config;
use crate::models::{ColumnSchema, ForeignKey, KbCatalog, KbTable, MSchema, TableSchema};
use crate::services::llm::{ChatApi, LlmError};

/// Scripted chat backend shared by the pipeline tests.
pub struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| (*s).to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
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

/// Reduced EDR schema used across pipeline tests.
pub fn edr_schema() -> MSchema {
    let mut detail = TableSchema {
        name: "weak_password_app_detail".to_string(),
        columns: ["app_id", "pass_wd", "level", "last_find_time", "node_id", "less_user"]
            .iter()
            .map(|c| column(c))
            .collect(),
        ..Default::default()
    };
    detail.foreign_keys.push(ForeignKey {
        column: "app_id".to_string(),
        ref_table: "weak_password_app".to_string(),
        ref_column: "app_id".to_string(),
    });

    MSchema {
        tables: vec![
            TableSchema {
                name: "weak_password_app".to_string(),
                columns: ["app_id", "name", "app_type"].iter().map(|c| column(c)).collect(),
                ..Default::default()
            },
            detail,
            TableSchema {
                name: "virus_details".to_string(),
                columns: ["node_id", "virus_name", "find_time", "less_user"]
                    .iter()
                    .map(|c| column(c))
                    .collect(),
                ..Default::default()
            },
        ],
    }
}

pub fn edr_kb() -> KbCatalog {
    KbCatalog {
        tables: vec![KbTable {
            name: "weak_password_app".to_string(),
            purpose: "Applications flagged with weak passwords".to_string(),
            aliases: vec!["weak password".to_string()],
            ..Default::default()
        }],
    }
}

pub fn test_config() -> Config {
    Config::default()
}
