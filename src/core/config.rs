use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// Root data directory for adjudex.
/// `ADJUDEX_DATA_DIR` overrides the default `~/.adjudex`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ADJUDEX_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".adjudex")
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Cron schedule for the queue retention sweep (6-field, seconds first).
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Environment variable holding the API key, read at client construction.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Tool whose result is captured as the run's determination.
    #[serde(default = "default_determination_tool")]
    pub determination_tool: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Command spawned as the MCP tool server (JSON-RPC over stdio).
    #[serde(default = "default_tools_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
}

fn default_sweep_schedule() -> String {
    "0 */5 * * * *".to_string()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_max_turns() -> u32 {
    30
}
fn default_determination_tool() -> String {
    "propose_determination".to_string()
}
fn default_tools_command() -> String {
    "adjudex-tools".to_string()
}
fn default_concurrency() -> usize {
    3
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_completed_retention_secs() -> u64 {
    3600
}
fn default_failed_retention_secs() -> u64 {
    604_800
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sweep_schedule: default_sweep_schedule(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            determination_tool: default_determination_tool(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command: default_tools_command(),
            args: Vec::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            completed_retention_secs: default_completed_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
        }
    }
}

impl Config {
    /// Load configuration from `ADJUDEX_CONFIG` or `<data_dir>/config.toml`.
    pub async fn load() -> Result<Self> {
        let path = match std::env::var("ADJUDEX_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => data_dir().join("config.toml"),
        };
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config.toml found, using defaults.");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        info!(
            "Loaded config: model={}, max_turns={}, concurrency={}",
            config.model.model, config.review.max_turns, config.queue.concurrency
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.model.base_url)
            .with_context(|| format!("Invalid model base_url: {}", self.model.base_url))?;
        if self.review.max_turns == 0 {
            bail!("review.max_turns must be at least 1");
        }
        if self.queue.concurrency == 0 {
            bail!("queue.concurrency must be at least 1");
        }
        if self.queue.max_attempts == 0 {
            bail!("queue.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.model.base_url, "https://api.anthropic.com");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.review.max_turns, 30);
        assert_eq!(config.review.determination_tool, "propose_determination");
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.queue.max_attempts, 2);
        assert_eq!(config.queue.completed_retention_secs, 3600);
        assert_eq!(config.queue.failed_retention_secs, 604_800);
    }

    #[test]
    fn parse_full_toml_config() {
        let content = r#"
[service]
sweep_schedule = "0 */10 * * * *"

[model]
base_url = "https://llm.internal.example"
model = "claude-opus-4"
max_tokens = 2048
api_key_env = "REVIEW_API_KEY"

[review]
max_turns = 12
determination_tool = "submit_determination"

[tools]
command = "clinical-tools"
args = ["--stdio"]

[queue]
concurrency = 5
poll_interval_ms = 250
max_attempts = 4
backoff_base_ms = 500
completed_retention_secs = 60
failed_retention_secs = 120
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.service.sweep_schedule, "0 */10 * * * *");
        assert_eq!(config.model.model, "claude-opus-4");
        assert_eq!(config.model.api_key_env, "REVIEW_API_KEY");
        assert_eq!(config.review.max_turns, 12);
        assert_eq!(config.tools.command, "clinical-tools");
        assert_eq!(config.tools.args, vec!["--stdio".to_string()]);
        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.max_attempts, 4);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let content = r#"
[review]
max_turns = 5
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.review.max_turns, 5);
        assert_eq!(config.review.determination_tool, "propose_determination");
        assert_eq!(config.model.model, "claude-sonnet-4-20250514");
        assert_eq!(config.queue.concurrency, 3);
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml"))
            .await
            .unwrap();
        assert_eq!(config.review.max_turns, 30);
    }

    #[tokio::test]
    async fn load_rejects_invalid_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[model]\nbase_url = \"not a url\"\n").unwrap();
        assert!(Config::load_from(&path).await.is_err());
    }

    #[tokio::test]
    async fn load_rejects_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[queue]\nconcurrency = 0\n").unwrap();
        assert!(Config::load_from(&path).await.is_err());
    }
}
