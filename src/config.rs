//! Configuration
//!
//! Loading order (priority from highest to lowest):
//! 1. Environment variables (provider vars plus the `T2SQL_*`/`SQL_*` flags)
//! 2. Configuration file (conf/config.toml or config.toml)
//! 3. Default values

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::services::guard::DEFAULT_MAX_LIMIT;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub guard: GuardConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
    /// Verbose stage logging (`T2SQL_DEBUG=1`).
    pub debug: bool,
}

/// LLM provider settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature_planner: f64,
    pub temperature_generator: f64,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: None,
            model: "qwen-max".to_string(),
            temperature_planner: 0.1,
            temperature_generator: 0.2,
            timeout_seconds: 120,
        }
    }
}

/// SQL guard settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub max_limit: u32,
    /// `SQL_PERMISSIVE_MODE=1`: skip LIMIT handling and ORDER BY stripping.
    pub permissive: bool,
    /// `SQL_PERMITTED_ALIASES`: extra derived aliases, comma-separated.
    pub permitted_aliases: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            permissive: false,
            permitted_aliases: Vec::new(),
        }
    }
}

/// Locations of the read-only process-wide inputs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub schema_path: String,
    pub kb_catalog_path: String,
    pub semantic_index_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            schema_path: "outputs/m_schema.json".to_string(),
            kb_catalog_path: "outputs/kb/kb_catalog.json".to_string(),
            semantic_index_dir: "outputs/semantic_index".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

impl Config {
    /// Load configuration with environment variable and file support.
    pub fn load(config_path: Option<&str>) -> Result<Self, anyhow::Error> {
        let config_path = config_path
            .map(str::to_string)
            .or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::debug!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - QWEN_BASE_URL / DASHSCOPE_BASE_URL / MODELSCOPE_BASE_URL: API base
    /// - DASHSCOPE_API_KEY / QWEN_API_KEY / MODELSCOPE_API_KEY: API key
    /// - QWEN_MODEL: model name
    /// - T2SQL_DEBUG=1: verbose stage logging
    /// - SQL_PERMISSIVE_MODE=1: permissive guard mode
    /// - SQL_PERMITTED_ALIASES: comma-separated extra derived aliases
    fn apply_env_overrides(&mut self) {
        if let Some(base) = first_env(&["QWEN_BASE_URL", "DASHSCOPE_BASE_URL", "MODELSCOPE_BASE_URL"])
        {
            self.llm.api_base = base;
        }
        if let Some(key) = first_env(&["DASHSCOPE_API_KEY", "QWEN_API_KEY", "MODELSCOPE_API_KEY"]) {
            self.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("QWEN_MODEL") {
            self.llm.model = model;
        }

        if env_flag("T2SQL_DEBUG") {
            self.debug = true;
        }
        if env_flag("SQL_PERMISSIVE_MODE") {
            self.guard.permissive = true;
        }
        if let Ok(aliases) = std::env::var("SQL_PERMITTED_ALIASES") {
            self.guard.permitted_aliases.extend(
                aliases
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty()),
            );
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.llm.api_base.is_empty() {
            anyhow::bail!("llm.api_base cannot be empty");
        }
        if self.guard.max_limit == 0 {
            anyhow::bail!("guard.max_limit must be > 0");
        }
        if self.data.schema_path.is_empty() {
            anyhow::bail!("data.schema_path cannot be empty");
        }
        Ok(())
    }

    /// Effective tracing directive: `T2SQL_DEBUG` raises the crate level.
    pub fn log_directive(&self) -> String {
        if self.debug {
            format!("{},t2sql=debug", self.logging.level)
        } else {
            self.logging.level.clone()
        }
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some((*path).to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok().filter(|v| !v.is_empty()))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}
