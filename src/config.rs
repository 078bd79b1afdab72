//! Daemon configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Intake pipeline configuration.
///
/// Every count and duration here is validated once at startup; the daemon
/// exits rather than run with a non-positive interval or retry budget.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Wall-clock interval between poll passes.
    pub poll_interval: Duration,
    /// Subject filter applied when listing inbox messages.
    pub subject_filter: String,
    /// Failed attempt cycles allowed per attachment within a single pass.
    pub max_retries: u32,
    /// Total attempt ceiling across passes before a message is permanently skipped.
    pub max_attempts: u32,
    /// Base delay between in-pass retries (grows exponentially, jittered).
    pub retry_backoff: Duration,
    /// Location of the dedup ledger database file.
    pub ledger_path: PathBuf,
    /// Directory receiving candidates.csv and rejected.csv.
    pub output_dir: PathBuf,
    /// How long shutdown waits for the in-flight pass before forcing exit.
    pub shutdown_grace: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600), // 1 hour
            subject_filter: "application".to_string(),
            max_retries: 3,
            max_attempts: 9,
            retry_backoff: Duration::from_secs(10),
            ledger_path: PathBuf::from("data/intake-ledger.db"),
            output_dir: PathBuf::from("data"),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl IntakeConfig {
    /// Load configuration from `INTAKE_*` environment variables, falling
    /// back to defaults for anything unset. Fails on unparseable or
    /// non-positive values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            poll_interval: env_duration_secs(
                "INTAKE_POLL_INTERVAL_SECS",
                defaults.poll_interval,
            )?,
            subject_filter: std::env::var("INTAKE_SUBJECT_FILTER")
                .unwrap_or(defaults.subject_filter),
            max_retries: env_u32("INTAKE_MAX_RETRIES", defaults.max_retries)?,
            max_attempts: env_u32("INTAKE_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_backoff: env_duration_secs(
                "INTAKE_RETRY_BACKOFF_SECS",
                defaults.retry_backoff,
            )?,
            ledger_path: std::env::var("INTAKE_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            output_dir: std::env::var("INTAKE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            shutdown_grace: env_duration_secs(
                "INTAKE_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(invalid("INTAKE_POLL_INTERVAL_SECS", "must be positive"));
        }
        if self.retry_backoff.is_zero() {
            return Err(invalid("INTAKE_RETRY_BACKOFF_SECS", "must be positive"));
        }
        if self.shutdown_grace.is_zero() {
            return Err(invalid("INTAKE_SHUTDOWN_GRACE_SECS", "must be positive"));
        }
        if self.max_retries == 0 {
            return Err(invalid("INTAKE_MAX_RETRIES", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("INTAKE_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.max_attempts < self.max_retries {
            return Err(invalid(
                "INTAKE_MAX_ATTEMPTS",
                "must be at least INTAKE_MAX_RETRIES (one full pass of retries)",
            ));
        }
        if self.subject_filter.trim().is_empty() {
            return Err(invalid("INTAKE_SUBJECT_FILTER", "must not be blank"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected seconds as a positive integer, got {raw:?}"),
            }),
        Err(_) => Ok(default),
    }
}
