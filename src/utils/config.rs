// src/utils/config.rs
//! Engine configuration
//!
//! Layered, lowest precedence first:
//!
//! 1. Embedded defaults (`config/default.toml`)
//! 2. Optional `config/accelerate.{toml,yaml,json}` in the working directory
//! 3. `CREWAI_ACCELERATE_*` environment variables
//!
//! Component toggles are flat (`CREWAI_ACCELERATE_MEMORY=false`), nested
//! settings use `__` (`CREWAI_ACCELERATE_STORAGE__POOL_SIZE=8`).

use crate::backend::Component;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Prefix shared by every configuration variable
pub const ENV_PREFIX: &str = "CREWAI_ACCELERATE";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Master switch for the native backend
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub memory: Option<bool>,

    #[serde(default)]
    pub tools: Option<bool>,

    #[serde(default)]
    pub tasks: Option<bool>,

    #[serde(default)]
    pub serialization: Option<bool>,

    #[serde(default)]
    pub database: Option<bool>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Executor limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tasks allowed to run at the same time
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Nested tool calls allowed below a top-level call
    #[serde(default = "default_recursion_depth")]
    pub tool_max_recursion_depth: usize,

    /// Wall-clock bound on one tool call
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bounded wait for a free connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,

    /// SQLite busy handler timeout per connection
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_recursion_depth() -> usize {
    10
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    5_000
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            tool_max_recursion_depth: default_recursion_depth(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl StorageSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory: None,
            tools: None,
            tasks: None,
            serialization: None,
            database: None,
            runtime: RuntimeConfig::default(),
            storage: StorageSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, optional file and the process environment
    pub fn load() -> Result<Self> {
        Self::build(None, true)
    }

    /// Load configuration from defaults and an explicit variable map.
    ///
    /// Keys are full variable names (`CREWAI_ACCELERATE_MEMORY`). No file or
    /// process environment is consulted.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self> {
        let source: config::Map<String, String> = vars.into_iter().collect();
        Self::build(Some(source), false)
    }

    fn build(env: Option<config::Map<String, String>>, with_files: bool) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if with_files {
            builder = builder.add_source(File::with_name("config/accelerate").required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: EngineConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_concurrent_tasks == 0 {
            return Err(EngineError::ConfigError(
                "runtime.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.runtime.tool_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "runtime.tool_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.storage.pool_size == 0 {
            return Err(EngineError::ConfigError(
                "storage.pool_size must be at least 1".to_string(),
            ));
        }
        if self.storage.acquire_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "storage.acquire_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Explicit per-component override, if configured
    pub fn override_for(&self, component: Component) -> Option<bool> {
        match component {
            Component::Memory => self.memory,
            Component::Tools => self.tools,
            Component::Tasks => self.tasks,
            Component::Serialization => self.serialization,
            Component::Database => self.database,
        }
    }

    /// Set or clear the override for one component
    pub fn set_override(&mut self, component: Component, value: Option<bool>) {
        let slot = match component {
            Component::Memory => &mut self.memory,
            Component::Tools => &mut self.tools,
            Component::Tasks => &mut self.tasks,
            Component::Serialization => &mut self.serialization,
            Component::Database => &mut self.database,
        };
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_env_map(HashMap::new()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.memory, None);
        assert_eq!(config.storage.pool_size, 4);
        assert_eq!(config.runtime.tool_max_recursion_depth, 10);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.runtime.max_concurrent_tasks >= 1);
    }

    #[test]
    fn test_component_overrides_from_env() {
        let config = EngineConfig::from_env_map(vars(&[
            ("CREWAI_ACCELERATE_MEMORY", "false"),
            ("CREWAI_ACCELERATE_TOOLS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.override_for(Component::Memory), Some(false));
        assert_eq!(config.override_for(Component::Tools), Some(true));
        assert_eq!(config.override_for(Component::Tasks), None);
    }

    #[test]
    fn test_master_switch_and_nested() {
        let config = EngineConfig::from_env_map(vars(&[
            ("CREWAI_ACCELERATE_ENABLED", "false"),
            ("CREWAI_ACCELERATE_STORAGE__POOL_SIZE", "8"),
            ("CREWAI_ACCELERATE_RUNTIME__MAX_CONCURRENT_TASKS", "2"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.storage.pool_size, 8);
        assert_eq!(config.runtime.max_concurrent_tasks, 2);
    }

    #[test]
    fn test_validation() {
        let result = EngineConfig::from_env_map(vars(&[(
            "CREWAI_ACCELERATE_STORAGE__POOL_SIZE",
            "0",
        )]));
        assert!(result.is_err());

        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        config.runtime.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_override() {
        let mut config = EngineConfig::default();
        config.set_override(Component::Database, Some(false));
        assert_eq!(config.override_for(Component::Database), Some(false));
        config.set_override(Component::Database, None);
        assert_eq!(config.override_for(Component::Database), None);
    }
}
