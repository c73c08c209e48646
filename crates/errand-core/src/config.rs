//! Configuration for errand.
//!
//! Loaded from the first source that exists:
//! 1. `./errand.toml` (project local)
//! 2. `~/.config/errand/config.toml` (user config)
//! 3. Built-in defaults
//!
//! Environment variables are applied on top in every case.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTER_TASK_DELAY_MS: u64 = 2000;
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DATA_FILE: &str = "errand-tasks.json";
pub const DEFAULT_HISTORY_FILE: &str = "errand-history.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrandConfig {
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub storage: StorageConfig,
    pub executor: ExecutorConfig,
}

impl ErrandConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = if Path::new("errand.toml").exists() {
            Self::parse_file("errand.toml")?
        } else if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            Self::parse_file(&user_config)?
        } else {
            Self::default()
        };

        config.apply_overrides(env);
        Ok(config)
    }

    /// Load a specific file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("errand").join("config.toml"))
    }

    /// Apply `ERRAND_*` overrides read through `env`. Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = env("ERRAND_INTER_TASK_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.scheduler.inter_task_delay_ms = ms;
        }
        if let Some(ms) = env("ERRAND_EXECUTOR_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.scheduler.executor_timeout_ms = Some(ms);
        }
        if let Some(ms) = env("ERRAND_BACKEND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.persistence.backend_timeout_ms = ms;
        }
        if let Some(purge) = env("ERRAND_PURGE_RESULTS_ON_DELETE").and_then(|v| v.parse().ok()) {
            self.persistence.purge_results_on_delete = purge;
        }
        if let Some(path) = env("ERRAND_DATA_FILE") {
            self.storage.data_file = PathBuf::from(path);
        }
        if let Some(path) = env("ERRAND_HISTORY_FILE") {
            self.storage.history_file = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.backend_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "persistence.backend_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(program) = &self.executor.program
            && program.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "executor.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn inter_task_delay(&self) -> Duration {
        Duration::from_millis(self.scheduler.inter_task_delay_ms)
    }

    pub fn executor_timeout(&self) -> Option<Duration> {
        self.scheduler.executor_timeout_ms.map(Duration::from_millis)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence.backend_timeout_ms)
    }
}

/// Run pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between consecutive executor calls in one run.
    pub inter_task_delay_ms: u64,

    /// Per-call executor limit. Absent means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inter_task_delay_ms: DEFAULT_INTER_TASK_DELAY_MS,
            executor_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend_timeout_ms: u64,

    /// Drop a task's results when the task is deleted.
    pub purge_results_on_delete: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: DEFAULT_BACKEND_TIMEOUT_MS,
            purge_results_on_delete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_file: PathBuf,
    pub history_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            history_file: PathBuf::from(DEFAULT_HISTORY_FILE),
        }
    }
}

/// External agent command. `{target}` and `{query}` in `args` are substituted per call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub args: Vec<String>,
}
