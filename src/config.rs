use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub loaders: LoadersConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root directory of the sharded content store.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WorkerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_task_timeout_secs() -> u64 {
    3600
}
fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadersConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Target segment size, in characters, for web page text.
    #[serde(default = "default_segment_chars")]
    pub segment_chars: usize,
    #[serde(default = "default_arxiv_api_base")]
    pub arxiv_api_base: String,
}

impl Default for LoadersConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            segment_chars: default_segment_chars(),
            arxiv_api_base: default_arxiv_api_base(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("docflow/{}", env!("CARGO_PKG_VERSION"))
}
fn default_segment_chars() -> usize {
    1000
}
fn default_arxiv_api_base() -> String {
    "https://export.arxiv.org/api/query".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_analysis_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl AnalysisConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "gemma:7b".to_string()
}
fn default_analysis_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// A config with every section at its default, rooted at `data_dir`.
    pub fn minimal(data_dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: data_dir.join("docflow.sqlite"),
            },
            store: StoreConfig {
                root: data_dir.join("store"),
            },
            worker: WorkerConfig::default(),
            loaders: LoadersConfig::default(),
            analysis: AnalysisConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            anyhow::bail!("worker.concurrency must be > 0");
        }
        if self.worker.task_timeout_secs == 0 {
            anyhow::bail!("worker.task_timeout_secs must be > 0");
        }
        if self.worker.queue_capacity == 0 {
            anyhow::bail!("worker.queue_capacity must be > 0");
        }
        if self.loaders.segment_chars == 0 {
            anyhow::bail!("loaders.segment_chars must be > 0");
        }
        if self.loaders.request_timeout_secs == 0 {
            anyhow::bail!("loaders.request_timeout_secs must be > 0");
        }

        match self.analysis.provider.as_str() {
            "disabled" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown analysis provider: '{}'. Must be disabled or ollama.",
                other
            ),
        }
        if self.analysis.is_enabled() && self.analysis.model.trim().is_empty() {
            anyhow::bail!(
                "analysis.model must be specified when provider is '{}'",
                self.analysis.provider
            );
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
