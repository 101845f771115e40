use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::github::retry::{DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT};

/// Hard ceiling for race revalidation depth
pub const MAX_RACE_DEPTH_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to read .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main configuration structure for wiggum
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WiggumConfig {
    pub github: GitHubConfig,
    pub retry: RetryConfig,
    pub detection: DetectionConfig,
    pub monitor: MonitorConfig,
    pub workflow: WorkflowConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GitHubConfig {
    /// API token; falls back to GITHUB_TOKEN / GH_TOKEN
    pub token: Option<String>,
    /// Repository owner; derived from the origin remote when unset
    pub owner: Option<String>,
    /// Repository name; derived from the origin remote when unset
    pub repo: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total write attempts for transient failures
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionConfig {
    /// Detections slower than this re-check the tracked resource
    pub slow_threshold_ms: u64,
    pub max_race_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub workflow_timeout_secs: u64,
    pub checks_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Used when the persisted state carries no maxIterations
    pub default_max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for WiggumConfig {
    fn default() -> Self {
        Self {
            github: GitHubConfig {
                token: None,
                owner: None,
                repo: None,
                request_timeout_ms: 30_000,
            },
            retry: RetryConfig {
                max_retries: DEFAULT_MAX_RETRIES,
            },
            detection: DetectionConfig {
                slow_threshold_ms: 5_000,
                max_race_depth: 3,
            },
            monitor: MonitorConfig {
                workflow_timeout_secs: 1_800, // 30 minutes
                checks_timeout_secs: 1_800,
                poll_interval_secs: 10,
            },
            workflow: WorkflowConfig {
                default_max_iterations: 10,
            },
            observability: ObservabilityConfig {
                log_level: "warn".to_string(),
                json: false,
            },
        }
    }
}

impl WiggumConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (wiggum.toml, .wiggum-rc)
    /// 3. Environment variables (WIGGUM_ prefix, `__` between sections,
    ///    e.g. WIGGUM_RETRY__MAX_RETRIES)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), None)
    }

    /// Like [`WiggumConfig::load`], reading files from `dir` and, when given,
    /// environment values from `env` instead of the process environment.
    pub fn load_from(dir: &Path, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&WiggumConfig::default())?);

        let toml_path = dir.join("wiggum.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path).format(FileFormat::Toml));
        }

        let rc_path = dir.join(".wiggum-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(FileFormat::Toml));
        }

        let using_process_env = env.is_none();
        builder = builder.add_source(
            Environment::with_prefix("WIGGUM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut wiggum_config: WiggumConfig = builder.build()?.try_deserialize()?;

        // Special handling for the token: the usual GitHub variables also work
        if wiggum_config.github.token.is_none() && using_process_env {
            wiggum_config.github.token = ["GITHUB_TOKEN", "GH_TOKEN"]
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|t| !t.is_empty()));
        }

        wiggum_config.validate()?;
        Ok(wiggum_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RETRIES_LIMIT).contains(&self.retry.max_retries) {
            return Err(ConfigError::Invalid {
                field: "retry.max_retries",
                reason: format!("must be between 1 and {MAX_RETRIES_LIMIT}"),
            });
        }
        if self.detection.max_race_depth > MAX_RACE_DEPTH_LIMIT {
            return Err(ConfigError::Invalid {
                field: "detection.max_race_depth",
                reason: format!("must be at most {MAX_RACE_DEPTH_LIMIT}"),
            });
        }
        if self.workflow.default_max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "workflow.default_max_iterations",
                reason: "must be positive".to_string(),
            });
        }
        for (field, value) in [
            ("monitor.workflow_timeout_secs", self.monitor.workflow_timeout_secs),
            ("monitor.checks_timeout_secs", self.monitor.checks_timeout_secs),
            ("github.request_timeout_ms", self.github.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// TOML rendering with the token redacted
    pub fn to_display_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.github.token.is_some() {
            shown.github.token = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.detection.slow_threshold_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.github.request_timeout_ms)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<(), ConfigError> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::debug!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<WiggumConfig, ConfigError>> = std::sync::LazyLock::new(|| {
    // .env first so its values are visible to the environment source
    WiggumConfig::load_env_file()?;
    WiggumConfig::load()
});

/// Get the global configuration
pub fn config() -> anyhow::Result<&'static WiggumConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))
}
