use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Workflow engine limits and toggles, read once at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum drafting iterations per phase before the run is aborted
    #[serde(default = "default_max_plan_iterations")]
    pub max_plan_iterations: u32,
    /// Maximum engine steps per run (runaway-graph guard)
    #[serde(default = "default_max_engine_steps")]
    pub max_engine_steps: usize,
    /// Maximum poll attempts while a job reports an in-progress status
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Maximum consecutive status-channel errors before a poll is abandoned
    #[serde(default = "default_max_transient_poll_errors")]
    pub max_transient_poll_errors: u32,
    /// Run a background investigation before drafting the context summary
    #[serde(default)]
    pub background_investigation: bool,
}

fn default_max_plan_iterations() -> u32 {
    3
}

fn default_max_engine_steps() -> usize {
    200
}

fn default_max_poll_attempts() -> u32 {
    crate::tasks::poller::MAX_POLL_ATTEMPTS
}

fn default_max_transient_poll_errors() -> u32 {
    crate::tasks::poller::MAX_TRANSIENT_ERROR_ATTEMPTS
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: default_max_plan_iterations(),
            max_engine_steps: default_max_engine_steps(),
            max_poll_attempts: default_max_poll_attempts(),
            max_transient_poll_errors: default_max_transient_poll_errors(),
            background_investigation: false,
        }
    }
}

/// LLM collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier passed to the provider
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens per generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Source-control collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Branch that task branches fork from and merge back into
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State directory holding checkpoints and logs
    #[serde(default = "default_state_dir")]
    pub state: String,
}

fn default_state_dir() -> String {
    ".foreman".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: default_state_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to a file under the state dir (false = stderr)
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

impl Config {
    /// Path to the foreman config file within the working directory
    pub fn config_path() -> PathBuf {
        PathBuf::from(".foreman/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so foreman works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Project config in .foreman/ (primary config location)
        let project_config = Self::config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/foreman/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("foreman").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with FOREMAN_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("FOREMAN")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to .foreman/config.toml
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Get absolute path to the state directory
    pub fn state_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.paths.state);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Get absolute path to the checkpoints directory
    pub fn checkpoints_path(&self) -> PathBuf {
        self.state_path().join("checkpoints")
    }

    /// Get absolute path to the logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }
}
