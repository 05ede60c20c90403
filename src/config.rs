//! Session configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Log output format for the binary's subscriber.
#[derive(Debug, Copy, Clone, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging settings handed to the session at construction.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log at debug level and trace every remote call.
    #[serde(default)]
    pub debug: bool,
    /// Output format used by the binary.
    #[serde(default)]
    pub format: LogFormat,
}

/// Readiness polling constants used while a front-end attaches.
///
/// The defaults paper over an unspecified consistency window on the
/// server side; lowering them is only safe against a server known to
/// publish new models atomically.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    /// Delay between two tag listings.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Delay between spotting the target tag and acquiring its model.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            grace_ms: default_grace_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_grace_ms() -> u64 {
    3000
}

/// Bridge helper process that owns the vendor object model.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Helper executable.
    #[serde(default = "default_bridge_command")]
    pub command: String,
    /// Extra arguments passed before the protocol starts.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
        }
    }
}

fn default_bridge_command() -> String {
    "comsol-bridge".into()
}

fn default_version() -> String {
    "5.3".into()
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Session configuration parsed from `mph-session.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Engine version to start, e.g. `"5.3"`.
    #[serde(default = "default_version")]
    pub version: String,
    /// Upper bound for front-end attachment and process termination.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Regenerate the remote type bindings before use.
    #[serde(default)]
    pub rebuild: bool,
    /// Readiness polling constants.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Bridge helper settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Install roots keyed by version string.
    #[serde(default)]
    pub installs: HashMap<String, PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            timeout_seconds: default_timeout_seconds(),
            rebuild: false,
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
            bridge: BridgeConfig::default(),
            installs: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Front-end attachment timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Delay between two readiness polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    /// Delay before acquiring a freshly spotted model.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.polling.grace_ms)
    }

    /// Check value ranges.
    ///
    /// The version string is not checked here: an unknown
    /// version surfaces as `AppError::Version` when the session starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds == 0 {
            return Err(AppError::Config(
                "timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(AppError::Config(
                "polling.interval_ms must be greater than zero".into(),
            ));
        }

        if self.bridge.command.trim().is_empty() {
            return Err(AppError::Config("bridge.command must not be empty".into()));
        }

        Ok(())
    }
}
