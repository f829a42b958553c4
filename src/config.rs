//! Configuration System using Figment
//!
//! Configuration is loaded from (lowest to highest precedence):
//! 1. Built-in defaults
//! 2. A TOML file (`config/tem_logger.toml` unless another path is given)
//! 3. Environment variables prefixed with `TEMLOG_`
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! TEMLOG_APPLICATION__LOG_LEVEL=debug
//! TEMLOG_POLL__INTERVAL="500ms"
//! TEMLOG_POLL__MAX_CONSECUTIVE_FAILURES=20
//! ```
//!
//! # Example file
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [poll]
//! interval = "100ms"
//! max_consecutive_failures = 50
//! output_path = "C:/jeol_dnr/SynergyED_stage_pos_log.csv"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/tem_logger.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A value was out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling settings for the stage logger
    #[serde(default)]
    pub poll: PollSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Sampling settings as they appear in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// Time between ticks
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Consecutive read failures tolerated before aborting (0 = unlimited)
    #[serde(default)]
    pub max_consecutive_failures: u32,
    /// Per-read timeout; defaults to the interval and never exceeds it
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,
    /// Log a progress line every N successful samples (0 = never)
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    /// CSV log destination
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_consecutive_failures: 0,
            read_timeout: None,
            progress_every: default_progress_every(),
            output_path: default_output_path(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_progress_every() -> u64 {
    10
}

fn default_output_path() -> PathBuf {
    PathBuf::from("SynergyED_stage_pos_log.csv")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl LoggerConfig {
    /// Load configuration from the default file location and environment.
    ///
    /// A missing default file is not an error; every field has a default.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file does not exist, cannot be parsed, or the
    /// resulting configuration is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::ValidationError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        Self::figment(path)
    }

    fn figment(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TEMLOG_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Interval is non-zero
    /// - Read timeout, when given, is non-zero
    /// - Output path is not empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.poll.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll.interval must be greater than zero".to_string(),
            ));
        }

        if self.poll.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationError(
                "poll.read_timeout must be greater than zero".to_string(),
            ));
        }

        if self.poll.output_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "poll.output_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the immutable run configuration from these settings.
    pub fn poll_config(&self) -> Result<PollConfig, ConfigError> {
        let mut config = PollConfig::new(&self.poll.output_path, self.poll.interval)?
            .with_max_consecutive_failures(self.poll.max_consecutive_failures)
            .with_progress_every(self.poll.progress_every);
        if let Some(timeout) = self.poll.read_timeout {
            config = config.with_read_timeout(timeout);
        }
        Ok(config)
    }
}

/// Immutable settings for one logging run.
///
/// Built once at startup and never modified while the scheduler runs. The read
/// timeout is always clamped to the interval so a hung read cannot hold the loop
/// past the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    interval: Duration,
    max_consecutive_failures: u32,
    read_timeout: Duration,
    output_path: PathBuf,
    progress_every: u64,
    max_samples: Option<u64>,
}

impl PollConfig {
    /// Create a run configuration with an unlimited failure threshold.
    ///
    /// # Errors
    /// Returns a validation error if `interval` is zero.
    pub fn new<P: AsRef<Path>>(output_path: P, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            interval,
            max_consecutive_failures: 0,
            read_timeout: interval,
            output_path: output_path.as_ref().to_path_buf(),
            progress_every: default_progress_every(),
            max_samples: None,
        })
    }

    /// Abort after more than `limit` consecutive read failures (0 = unlimited).
    pub fn with_max_consecutive_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = limit;
        self
    }

    /// Bound each instrument read. Values above the interval are clamped to it.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.read_timeout = timeout.min(self.interval);
        }
        self
    }

    /// Emit a progress line every `every` successful samples (0 = never).
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Stop after `samples` ticks instead of running until interrupted.
    pub fn with_max_samples(mut self, samples: Option<u64>) -> Self {
        self.max_samples = samples;
        self
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consecutive-failure threshold (0 = unlimited).
    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    /// Per-read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Log destination.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Progress line cadence in successful samples.
    pub fn progress_every(&self) -> u64 {
        self.progress_every
    }

    /// Optional tick bound for finite runs.
    pub fn max_samples(&self) -> Option<u64> {
        self.max_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoggerConfig::default();
        config.validate().unwrap();
        let poll = config.poll_config().unwrap();
        assert_eq!(poll.interval(), Duration::from_millis(100));
        assert_eq!(poll.read_timeout(), poll.interval());
        assert_eq!(poll.max_consecutive_failures(), 0);
        assert_eq!(poll.progress_every(), 10);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = PollConfig::new("log.csv", Duration::ZERO).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_read_timeout_clamped_to_interval() {
        let config = PollConfig::new("log.csv", Duration::from_secs(1))
            .unwrap()
            .with_read_timeout(Duration::from_secs(5));
        assert_eq!(config.read_timeout(), Duration::from_secs(1));

        let config = config.with_read_timeout(Duration::from_millis(200));
        assert_eq!(config.read_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [application]
                log_level = "debug"

                [poll]
                interval = "2s"
                max_consecutive_failures = 4
                output_path = "runs/stage.csv"
                "#,
            )?;
            jail.set_env("TEMLOG_POLL__MAX_CONSECUTIVE_FAILURES", "9");

            let config = LoggerConfig::load_from("logger.toml").unwrap();
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.poll.interval, Duration::from_secs(2));
            assert_eq!(config.poll.max_consecutive_failures, 9);
            assert_eq!(config.poll.output_path, PathBuf::from("runs/stage.csv"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("logger.toml", "[application]\nlog_level = \"loud\"\n")?;
            let err = LoggerConfig::load_from("logger.toml").unwrap_err();
            assert!(err.to_string().contains("Invalid log_level"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_rejected() {
        Jail::expect_with(|_jail| {
            let err = LoggerConfig::load_from("absent.toml").unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            Ok(())
        });
    }
}
