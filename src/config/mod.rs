//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString to
//! prevent log leaks.

use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::DispatcherConfig;
use crate::engine::{SchedulerConfig, WorkerConfig};
use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub tracking_service_url: String,
    pub notification_service_url: String,
    pub queue_name: String,
    /// How long after its last revisit a channel is due again.
    pub revisit_interval: chrono::Duration,
    pub revisit_check_interval_seconds: u64,
    pub revisit_retry_failed: bool,
    pub worker_concurrency: usize,
    pub visibility_timeout_seconds: i32,
    pub enqueue_timeout_seconds: u64,
    pub backend_timeout_seconds: u64,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            tracking_service_url: required_var("TRACKING_SERVICE_URL")?,
            notification_service_url: required_var("NOTIFICATION_SERVICE_URL")?,
            queue_name: std::env::var("TASKS_QUEUE").unwrap_or_else(|_| "channel_tasks".to_string()),
            revisit_interval: minutes_var("REVISIT_INTERVAL_MINUTES", 360)?,
            revisit_check_interval_seconds: parsed_var("REVISIT_CHECK_INTERVAL_SECONDS", 60)?,
            revisit_retry_failed: parsed_var("REVISIT_RETRY_FAILED", false)?,
            worker_concurrency: parsed_var("WORKER_CONCURRENCY", 4)?,
            visibility_timeout_seconds: parsed_var("VISIBILITY_TIMEOUT_SECONDS", 60)?,
            enqueue_timeout_seconds: parsed_var("ENQUEUE_TIMEOUT_SECONDS", 10)?,
            backend_timeout_seconds: parsed_var("BACKEND_TIMEOUT_SECONDS", 30)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_name: self.queue_name.clone(),
            enqueue_timeout: Duration::from_secs(self.enqueue_timeout_seconds),
            visibility_timeout: self.visibility_timeout_seconds,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            check_interval: Duration::from_secs(self.revisit_check_interval_seconds),
            staleness: self.revisit_interval,
            retry_failed: self.revisit_retry_failed,
            ..SchedulerConfig::default()
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrent: self.worker_concurrency,
            ..WorkerConfig::default()
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_seconds)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// A non-negative whole number of minutes that fits a `chrono::Duration`.
fn minutes_var(name: &str, default: i64) -> Result<chrono::Duration> {
    let minutes: i64 = parsed_var(name, default)?;
    chrono::Duration::try_minutes(minutes)
        .filter(|d| *d >= chrono::Duration::zero())
        .ok_or_else(|| {
            Error::Config(format!(
                "environment variable {name} is out of range: {minutes} minutes"
            ))
        })
}
