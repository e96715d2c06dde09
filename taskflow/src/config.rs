//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::resilience::DEFAULT_MAILBOX_CAPACITY;
use crate::schema::ResiliencePolicy;

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "TASKFLOW_LOG_LEVEL";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "TASKFLOW_LOG_FORMAT";
/// Environment variable overriding the default step timeout.
pub const ENV_STEP_TIMEOUT_MS: &str = "TASKFLOW_STEP_TIMEOUT_MS";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(other.to_string()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `taskflow=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Configuration of a [`PipelineEngine`](crate::pipeline::PipelineEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt timeout of steps that do not set one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Policy applied to steps that do not override it.
    #[serde(default)]
    pub default_policy: ResiliencePolicy,
    /// Mailbox capacity of each circuit breaker actor.
    #[serde(default = "default_mailbox_capacity")]
    pub breaker_mailbox_capacity: usize,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            default_policy: ResiliencePolicy::default(),
            breaker_mailbox_capacity: default_mailbox_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|name| std::env::var(name).ok())
    }

    /// Applies `TASKFLOW_*` overrides read through `lookup`.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse().map_err(|value| ConfigError::InvalidEnv {
                name: ENV_LOG_FORMAT.to_string(),
                value,
            })?;
        }
        if let Some(timeout) = lookup(ENV_STEP_TIMEOUT_MS) {
            self.default_step_timeout_ms =
                timeout.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_STEP_TIMEOUT_MS.to_string(),
                    value: timeout.clone(),
                })?;
        }
        Ok(self)
    }

    /// Sets the default step timeout.
    #[must_use]
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout_ms = crate::utils::duration_ms(timeout);
        self
    }

    /// Sets the default resilience policy.
    #[must_use]
    pub fn with_default_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the breaker mailbox capacity.
    #[must_use]
    pub fn with_breaker_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.breaker_mailbox_capacity = capacity;
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Returns the default step timeout.
    #[must_use]
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }
}
