use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub lineage: LineageConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit; attempt `n` waits `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EscalationConfig {
    /// Total executions of a step (first run included) before it is handed to healing.
    #[serde(default = "default_max_cognitive_attempts")]
    pub max_cognitive_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_heal_entropy")]
    pub heal_entropy_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LineageConfig {
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealingConfig {
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_true")]
    pub intelligent: bool,
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Messages endpoint override, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_cognitive_attempts() -> u32 {
    2
}

fn default_max_failures() -> u32 {
    3
}

fn default_heal_entropy() -> f64 {
    1.0
}

fn default_strategies() -> Vec<String> {
    vec!["conservative".to_string(), "aggressive".to_string()]
}

fn default_prune_threshold() -> f64 {
    1.5
}

fn default_max_depth() -> u32 {
    8
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./generated")
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_max_turns() -> u32 {
    30
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_cognitive_attempts: default_max_cognitive_attempts(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            heal_entropy_threshold: default_heal_entropy(),
        }
    }
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            prune_threshold: default_prune_threshold(),
            max_depth: default_max_depth(),
        }
    }
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            intelligent: default_true(),
        }
    }
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
            base_url: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("rhizome").required(false));
        }

        // Environment variable overrides with RHIZOME__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("RHIZOME")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// API key for intelligent regeneration, if one is configured and non-empty.
    pub fn claude_api_key(&self) -> Option<&str> {
        self.claude.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
