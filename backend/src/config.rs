use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::integrations::Endpoints;

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file holding accounts, credentials and policies
    pub registry_file: PathBuf,
    /// Fallback webhook for accounts without their own
    pub notify_webhook_url: Option<String>,
    pub scheduler: SchedulerConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    /// Aggregate usage percentage at which a traffic warning is emitted
    pub traffic_warning_percentage: f64,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub worker_pool_size: usize,
    pub misfire_grace_secs: u64,
    /// How often the registry is reconciled against the live job set
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub notify_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            misfire_grace_secs: 60,
            sync_interval_secs: 60,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            notify_timeout_secs: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            backoff_factor: 2.0,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_secs: 10,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults_scheduler = SchedulerConfig::default();
        let defaults_http = HttpConfig::default();
        let defaults_retry = RetryConfig::default();
        let defaults_poll = PollConfig::default();

        Ok(Config {
            registry_file: env::var("REGISTRY_FILE")
                .unwrap_or_else(|_| "./accounts.json".to_string())
                .into(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            scheduler: SchedulerConfig {
                worker_pool_size: parse_or("WORKER_POOL_SIZE", defaults_scheduler.worker_pool_size),
                misfire_grace_secs: parse_or("MISFIRE_GRACE_SECS", defaults_scheduler.misfire_grace_secs),
                sync_interval_secs: parse_or("SYNC_INTERVAL_SECS", defaults_scheduler.sync_interval_secs),
            },
            http: HttpConfig {
                timeout_secs: parse_or("HTTP_TIMEOUT_SECS", defaults_http.timeout_secs),
                notify_timeout_secs: parse_or("NOTIFY_TIMEOUT_SECS", defaults_http.notify_timeout_secs),
            },
            retry: RetryConfig {
                base_delay_secs: parse_or("RETRY_BASE_DELAY_SECS", defaults_retry.base_delay_secs),
                backoff_factor: parse_or("RETRY_BACKOFF_FACTOR", defaults_retry.backoff_factor),
            },
            poll: PollConfig {
                timeout_secs: parse_or("JOB_POLL_TIMEOUT_SECS", defaults_poll.timeout_secs),
                interval_secs: parse_or("JOB_POLL_INTERVAL_SECS", defaults_poll.interval_secs),
            },
            traffic_warning_percentage: parse_or("TRAFFIC_WARNING_PERCENTAGE", 70.0),
            endpoints: Endpoints::default(),
        })
    }

    /// Reject settings that would make the scheduler or retry executor misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.worker_pool_size == 0 {
            return Err(ConfigError::invalid("WORKER_POOL_SIZE", "must be at least 1"));
        }
        if self.scheduler.sync_interval_secs == 0 {
            return Err(ConfigError::invalid("SYNC_INTERVAL_SECS", "must be at least 1"));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::invalid("HTTP_TIMEOUT_SECS", "must be at least 1"));
        }
        if !(self.retry.base_delay_secs >= 0.0) {
            return Err(ConfigError::invalid("RETRY_BASE_DELAY_SECS", "must not be negative"));
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(ConfigError::invalid("RETRY_BACKOFF_FACTOR", "must be at least 1.0"));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::invalid("JOB_POLL_INTERVAL_SECS", "must be at least 1"));
        }
        if self.poll.timeout_secs < self.poll.interval_secs {
            return Err(ConfigError::invalid(
                "JOB_POLL_TIMEOUT_SECS",
                "must not be shorter than the poll interval",
            ));
        }
        if !(0.0..=100.0).contains(&self.traffic_warning_percentage) {
            return Err(ConfigError::invalid("TRAFFIC_WARNING_PERCENTAGE", "must be within 0..=100"));
        }
        Ok(())
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
