//! Configuration management
//!
//! Steward reads a TOML file at `~/.steward/config.toml` (created with
//! defaults on first run). The loaded [`Config`] is passed explicitly into
//! the agent, the token policy and the providers; nothing else reads the
//! process environment for settings.
//!
//! # Configuration Sections
//!
//! - **core**: workspace root, data directory, log level
//! - **llm**: endpoint, model, key name, timeouts, sampling temperatures
//! - **agent**: loop-breaking and token budget tuning
//! - **memory**: document store backend
//!
//! # Examples
//!
//! ```no_run
//! use steward_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Model: {}", config.llm.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub core: CoreConfig,

    pub llm: LLMConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Root of the per-task directories (supports ~ expansion)
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database location (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Chat-completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Secret key name; the value itself lives in the keychain
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,

    /// Upper bound on one completion call, including retries
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_step_temperature")]
    pub step_temperature: f32,

    #[serde(default = "default_planning_temperature")]
    pub planning_temperature: f32,
}

/// Agent loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Consecutive duplicate appends before the conversation is reset
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: u32,

    /// Pause length at the soft-warn token threshold
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,

    /// Overrides the model family's soft-warn threshold
    #[serde(default)]
    pub soft_warn_tokens: Option<usize>,

    /// Overrides the model family's hard context limit
    #[serde(default)]
    pub context_limit: Option<usize>,

    /// Step cap for `steward run`
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: default_repeat_threshold(),
            throttle_secs: default_throttle_secs(),
            soft_warn_tokens: None,
            context_limit: None,
            max_steps: default_max_steps(),
        }
    }
}

/// Document store backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    #[default]
    Sqlite,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.steward/data")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_name() -> String {
    "openai_api_key".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_step_temperature() -> f32 {
    0.5
}

fn default_planning_temperature() -> f32 {
    0.7
}

fn default_repeat_threshold() -> u32 {
    3
}

fn default_throttle_secs() -> u64 {
    10
}

fn default_max_steps() -> u32 {
    50
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_name: default_api_key_name(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            step_temperature: default_step_temperature(),
            planning_temperature: default_planning_temperature(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                workspace: PathBuf::from("~/.steward/workspace"),
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Load from `~/.steward/config.toml`, writing defaults if it is absent.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load from an explicit path, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load_or_create(),
        }
    }

    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// `EngineError::Config` when the file cannot be read, does not parse,
    /// or fails validation.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".steward").join("config.toml"))
    }

    /// Validate values, expand `~` and create missing directories.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.model.trim().is_empty() {
            return Err(EngineError::Config("llm.model must not be empty".to_string()));
        }
        if self.llm.max_attempts == 0 {
            return Err(EngineError::Config(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("step_temperature", self.llm.step_temperature),
            ("planning_temperature", self.llm.planning_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "llm.{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if self.agent.repeat_threshold == 0 {
            return Err(EngineError::Config(
                "agent.repeat_threshold must be at least 1".to_string(),
            ));
        }
        if let (Some(soft), Some(limit)) = (self.agent.soft_warn_tokens, self.agent.context_limit)
        {
            if soft >= limit {
                return Err(EngineError::Config(
                    "agent.soft_warn_tokens must be below agent.context_limit".to_string(),
                ));
            }
        }

        self.llm.base_url = self.llm.base_url.trim_end_matches('/').to_string();

        self.core.workspace = canonicalize_or_create(&expand_path(&self.core.workspace)?)?;
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// SQLite database file inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join("steward.db")
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::Config(format!("Invalid path {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.llm.api_key_name, "openai_api_key");
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.agent.repeat_threshold, 3);
        assert_eq!(config.agent.throttle_secs, 10);
        assert_eq!(config.memory.backend, MemoryBackend::Sqlite);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        assert_eq!(expanded, dirs::home_dir().unwrap().join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let contents = format!(
            "[core]\nworkspace = {:?}\ndata_dir = {:?}\n\n[llm]\nmodel = \"gpt-4\"\n\n[memory]\nbackend = \"in_memory\"\n",
            dir.path().join("ws"),
            dir.path().join("data"),
        );
        fs::write(&path, contents).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.llm.step_temperature, 0.5);
        assert_eq!(config.memory.backend, MemoryBackend::InMemory);
        assert!(config.core.workspace.is_dir());
        assert!(config.core.data_dir.is_dir());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.workspace = dir.path().join("ws");
        config.core.data_dir = dir.path().join("data");
        config.core.log_level = "loud".to_string();

        assert!(matches!(
            config.validate_and_process(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_soft_warn_must_be_below_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.workspace = dir.path().join("ws");
        config.core.data_dir = dir.path().join("data");
        config.agent.soft_warn_tokens = Some(9000);
        config.agent.context_limit = Some(8192);

        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.llm.model, deserialized.llm.model);
        assert_eq!(
            config.agent.repeat_threshold,
            deserialized.agent.repeat_threshold
        );
    }
}
