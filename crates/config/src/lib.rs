//! Configuration loading, validation, and management for redscope.
//!
//! Three sources feed the runtime:
//! - required environment values (API key, base URL, model name)
//! - optional tuning in `~/.redscope/config.toml`
//! - the tool-server document (`mcp.json`), see [`servers`]

pub mod servers;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use servers::{ServerDescriptor, TransportSpec, load_servers, parse_servers};

/// Environment variable holding the model API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable holding the model API base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
/// Environment variable holding the model name.
pub const MODEL_ENV: &str = "MODEL_NAME";

/// The fully resolved configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub runtime: RuntimeConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl AppConfig {
    /// Load the runtime file (default location unless `config_path` is
    /// given) and the required environment values.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"));
        let runtime = RuntimeConfig::load_from(&path)?;
        Self::from_lookup(|key| std::env::var(key).ok(), runtime)
    }

    /// Resolve the required values through `lookup`.
    ///
    /// A value that is missing or blank is fatal.
    pub fn from_lookup<F>(lookup: F, runtime: RuntimeConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingEnv(key))
        };

        Ok(Self {
            api_key: require(API_KEY_ENV)?,
            base_url: require(BASE_URL_ENV)?,
            model: require(MODEL_ENV)?,
            runtime,
        })
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".redscope")
    }
}

/// Tuning knobs. Every field has a default, so an absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Location of the tool-server document
    #[serde(default = "default_servers_path")]
    pub servers_path: PathBuf,

    /// Path to a `tokenizer.json` for exact token counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub model: ModelSettings,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub agent_mode: AgentModeConfig,

    /// Extra workflows, added after the built-in catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<WorkflowConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            servers_path: default_servers_path(),
            tokenizer_path: None,
            budget: BudgetConfig::default(),
            history: HistoryConfig::default(),
            model: ModelSettings::default(),
            timing: TimingConfig::default(),
            agent_mode: AgentModeConfig::default(),
            workflows: Vec::new(),
        }
    }
}

/// How the model's context window is split between input and reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_total_window")]
    pub total_window: usize,

    #[serde(default = "default_reserved_floor")]
    pub reserved_floor: usize,

    #[serde(default = "default_reply_ceiling")]
    pub reply_ceiling: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_window: default_total_window(),
            reserved_floor: default_reserved_floor(),
            reply_ceiling: default_reply_ceiling(),
        }
    }
}

/// Bounds on the rolling conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,

    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Upper bound on model/tool round trips within one turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Timeouts and delays, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Ceiling on a model request and on each tool-provider request
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,

    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            step_delay_secs: default_step_delay(),
            cleanup_timeout_secs: default_cleanup_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_delay_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

/// Autonomous agent mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModeConfig {
    /// Iterations before the agent stops on its own; 0 runs until the goal
    /// is met or nothing is left to try
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: usize,

    /// Minimum confidence (0-100) for a goal check to end the run
    #[serde(default = "default_goal_confidence")]
    pub goal_confidence: u8,

    #[serde(default = "default_action_delay")]
    pub action_delay_secs: u64,
}

impl Default for AgentModeConfig {
    fn default() -> Self {
        Self {
            iteration_limit: default_iteration_limit(),
            goal_confidence: default_goal_confidence(),
            action_delay_secs: default_action_delay(),
        }
    }
}

impl AgentModeConfig {
    pub fn action_delay(&self) -> Duration {
        Duration::from_secs(self.action_delay_secs)
    }
}

/// Largest iteration limit accepted for agent mode.
pub const MAX_ITERATION_LIMIT: usize = 200;

/// A user-defined workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<String>,
}

fn default_total_window() -> usize {
    8192
}
fn default_reserved_floor() -> usize {
    512
}
fn default_reply_ceiling() -> usize {
    4096
}
fn default_token_threshold() -> usize {
    4000
}
fn default_max_turns() -> usize {
    50
}
fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tool_rounds() -> usize {
    10
}
fn default_session_timeout() -> u64 {
    600
}
fn default_connect_timeout() -> u64 {
    60
}
fn default_reconnect_delay() -> u64 {
    10
}
fn default_step_delay() -> u64 {
    1
}
fn default_cleanup_timeout() -> u64 {
    5
}
fn default_iteration_limit() -> usize {
    20
}
fn default_goal_confidence() -> u8 {
    80
}
fn default_action_delay() -> u64 {
    2
}
fn default_servers_path() -> PathBuf {
    PathBuf::from("mcp.json")
}

impl RuntimeConfig {
    /// Load tuning from a specific file path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.budget;
        if b.reserved_floor > b.reply_ceiling || b.reply_ceiling > b.total_window {
            return Err(ConfigError::ValidationError(format!(
                "budget must satisfy reserved_floor ({}) <= reply_ceiling ({}) <= total_window ({})",
                b.reserved_floor, b.reply_ceiling, b.total_window
            )));
        }

        if self.history.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_turns must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.model.top_p) {
            return Err(ConfigError::ValidationError(
                "model.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent_mode.iteration_limit > MAX_ITERATION_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "agent_mode.iteration_limit must be at most {MAX_ITERATION_LIMIT}"
            )));
        }

        if self.agent_mode.goal_confidence > 100 {
            return Err(ConfigError::ValidationError(
                "agent_mode.goal_confidence must be between 0 and 100".into(),
            ));
        }

        for workflow in &self.workflows {
            if workflow.key.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "workflow key must not be empty".into(),
                ));
            }
            if workflow.steps.iter().all(|s| s.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "workflow '{}' needs at least one step",
                    workflow.key
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to load tool server document at {path}: {reason}")]
    ServersError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Required environment variable {0} is not set")]
    MissingEnv(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            (API_KEY_ENV, "sk-test"),
            (BASE_URL_ENV, "https://api.example.com/v1"),
            (MODEL_ENV, "gpt-4o"),
        ])
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.budget.total_window, 8192);
        assert_eq!(config.budget.reserved_floor, 512);
        assert_eq!(config.budget.reply_ceiling, 4096);
        assert_eq!(config.history.token_threshold, 4000);
        assert_eq!(config.timing.reconnect_delay_secs, 10);
        assert_eq!(config.timing.session_timeout(), Duration::from_secs(600));
        assert_eq!(config.servers_path, PathBuf::from("mcp.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn required_env_values_resolve() {
        let config = AppConfig::from_lookup(full_env(), RuntimeConfig::default()).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn missing_env_value_is_fatal() {
        let lookup = env(&[(API_KEY_ENV, "sk-test"), (MODEL_ENV, "gpt-4o")]);
        let err = AppConfig::from_lookup(lookup, RuntimeConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(BASE_URL_ENV)));
    }

    #[test]
    fn blank_env_value_counts_as_missing() {
        let lookup = env(&[
            (API_KEY_ENV, "   "),
            (BASE_URL_ENV, "https://api.example.com/v1"),
            (MODEL_ENV, "gpt-4o"),
        ]);
        let err = AppConfig::from_lookup(lookup, RuntimeConfig::default()).unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig::from_lookup(full_env(), RuntimeConfig::default()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = RuntimeConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.history.max_turns, 50);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[history]
token_threshold = 2000

[timing]
step_delay_secs = 0
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load_from(&path).unwrap();
        assert_eq!(config.history.token_threshold, 2000);
        assert_eq!(config.history.max_turns, 50);
        assert_eq!(config.timing.step_delay_secs, 0);
        assert_eq!(config.timing.reconnect_delay_secs, 10);
    }

    #[test]
    fn invalid_budget_rejected() {
        let mut config = RuntimeConfig::default();
        config.budget.reserved_floor = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = RuntimeConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn agent_mode_section_parses_and_is_bounded() {
        let toml_str = r#"
[agent_mode]
iteration_limit = 0
action_delay_secs = 0
"#;
        let mut config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent_mode.iteration_limit, 0);
        assert_eq!(config.agent_mode.goal_confidence, 80);
        assert_eq!(config.agent_mode.action_delay(), Duration::ZERO);
        assert!(config.validate().is_ok());

        config.agent_mode.iteration_limit = MAX_ITERATION_LIMIT + 1;
        assert!(config.validate().is_err());

        config.agent_mode.iteration_limit = 20;
        config.agent_mode.goal_confidence = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[budget\ntotal_window = ").unwrap();
        let err = RuntimeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn custom_workflow_parsing() {
        let toml_str = r#"
[[workflows]]
key = "tls_audit"
name = "TLS Audit"
description = "Certificate and cipher review"
steps = ["Enumerate TLS versions offered by {target}", "Check certificate chain of {target}"]
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workflows.len(), 1);
        assert_eq!(config.workflows[0].key, "tls_audit");
        assert_eq!(config.workflows[0].steps.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn workflow_without_steps_rejected() {
        let mut config = RuntimeConfig::default();
        config.workflows.push(WorkflowConfig {
            key: "empty".into(),
            name: "Empty".into(),
            description: String::new(),
            steps: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_toml_roundtrip() {
        let toml_str = RuntimeConfig::default_toml();
        assert!(toml_str.contains("total_window"));
        let parsed: RuntimeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.budget.reply_ceiling, 4096);
    }
}
