// Configuration File Support
//
// Configuration for the magick-agent CLI and engine. Supports TOML format
// with environment variable overrides, loaded from the XDG config directory:
// ~/.config/magick-agent/config.toml
//
// API keys are deliberately NOT part of the file format; they are read from
// the environment only (ANTHROPIC_API_KEY, OPENAI_API_KEY).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
}

impl LlmProvider {
    /// Environment variable holding the provider's API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            other => anyhow::bail!("unknown LLM provider '{other}' (use anthropic or openai)"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Agent behavior
    pub agent: AgentConfig,

    /// Command execution limits
    pub execution: ExecutionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider to use (anthropic, openai)
    pub provider: LlmProvider,

    /// Specific model name
    pub model: String,

    /// Token budget per completion request
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
        }
    }
}

/// Agent behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Execute generated commands without asking for confirmation
    pub auto_execute: bool,

    /// Conversation turns to keep in history
    pub max_history: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_execute: false,
            max_history: 10,
        }
    }
}

/// Command execution limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock timeout per execution, in seconds
    pub timeout_secs: u64,

    /// Character budget for captured stdout/stderr
    pub capture_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            capture_limit: 500,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Directory for the audit stream
    pub log_dir: PathBuf,

    /// Whether to write the audit stream at all
    pub audit: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            audit: true,
        }
    }
}

impl LoggingConfig {
    /// Path of the append-only audit stream
    pub fn audit_log_path(&self) -> PathBuf {
        self.log_dir.join("executions.jsonl")
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to register the Prometheus metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            execution: ExecutionConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config path, falling back to
    /// defaults when no file exists. Environment overrides are applied after
    /// parsing, and the result is validated.
    pub fn load() -> Result<Config> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Config> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {path:?}"))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {path:?}"))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            Config::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/magick-agent/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "magick-agent", "MagickAgent")
        {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("magick-agent")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - MAGICK_AGENT_PROVIDER
    /// - MAGICK_AGENT_MODEL
    /// - MAGICK_AGENT_AUTO_EXECUTE
    /// - MAGICK_AGENT_MAX_HISTORY
    /// - MAGICK_AGENT_TIMEOUT_SECS
    /// - MAGICK_AGENT_LOG_LEVEL
    /// - MAGICK_AGENT_LOG_DIR
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(provider) = std::env::var("MAGICK_AGENT_PROVIDER") {
            if let Ok(provider) = provider.parse() {
                self.llm.provider = provider;
            }
        }
        if let Ok(model) = std::env::var("MAGICK_AGENT_MODEL") {
            self.llm.model = model;
        }
        if let Ok(auto) = std::env::var("MAGICK_AGENT_AUTO_EXECUTE") {
            if let Ok(auto) = auto.parse::<bool>() {
                self.agent.auto_execute = auto;
            }
        }
        if let Ok(max) = std::env::var("MAGICK_AGENT_MAX_HISTORY") {
            if let Ok(max) = max.parse::<usize>() {
                self.agent.max_history = max;
            }
        }
        if let Ok(secs) = std::env::var("MAGICK_AGENT_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.execution.timeout_secs = secs;
            }
        }
        if let Ok(level) = std::env::var("MAGICK_AGENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("MAGICK_AGENT_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout_secs == 0 {
            anyhow::bail!("execution.timeout_secs must be greater than zero");
        }
        if self.execution.capture_limit == 0 {
            anyhow::bail!("execution.capture_limit must be greater than zero");
        }
        if self.agent.max_history == 0 {
            anyhow::bail!("agent.max_history must be greater than zero");
        }
        if self.llm.model.trim().is_empty() {
            anyhow::bail!("llm.model must not be empty");
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("unknown logging.level '{other}'"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert!(!config.agent.auto_execute);
        assert_eq!(config.execution.timeout_secs, 30);
        assert_eq!(config.execution.capture_limit, 500);
        assert!(config.logging.audit);
    }

    #[test]
    fn test_load_valid_toml_config() {
        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        let toml_content = r#"
            [llm]
            provider = "openai"
            model = "gpt-4o-mini"

            [agent]
            auto_execute = true
            max_history = 5

            [execution]
            timeout_secs = 60

            [logging]
            level = "debug"
            log_dir = "/tmp/magick-agent-logs"
        "#;
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load_from(temp_file.path()).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.agent.auto_execute);
        assert_eq!(config.agent.max_history, 5);
        assert_eq!(config.execution.timeout_secs, 60);
        assert_eq!(config.logging.level, "debug");
        // Unspecified sections keep their defaults.
        assert_eq!(config.llm.max_tokens, 1024);
        assert_eq!(config.execution.capture_limit, 500);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        temp_file.write_all(b"[llm\nprovider = ???").unwrap();
        assert!(Config::load_from(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.max_tokens, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.execution.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_parse_and_key_env() {
        assert_eq!(
            "anthropic".parse::<LlmProvider>().unwrap(),
            LlmProvider::Anthropic
        );
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert!("gemini".parse::<LlmProvider>().is_err());
        assert_eq!(LlmProvider::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_audit_log_path() {
        let config = Config::default();
        assert_eq!(
            config.logging.audit_log_path(),
            PathBuf::from("logs/executions.jsonl")
        );
    }
}
