// Retry executor - bounded retries with deterministic exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{CloudError, ConfigError};

/// Marks which failures are worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CloudError {
    fn is_retryable(&self) -> bool {
        CloudError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Result<Self, ConfigError> {
        if !(backoff_factor >= 1.0) || !backoff_factor.is_finite() {
            return Err(ConfigError::invalid("backoff_factor", format!("{} is not >= 1.0", backoff_factor)));
        }
        Ok(Self {
            max_retries,
            base_delay,
            backoff_factor,
        })
    }

    pub fn from_config(config: &RetryConfig, max_retries: u32) -> Result<Self, ConfigError> {
        if !(config.base_delay_secs >= 0.0) || !config.base_delay_secs.is_finite() {
            return Err(ConfigError::invalid("base_delay", "must be a non-negative number of seconds"));
        }
        Self::new(
            max_retries,
            Duration::from_secs_f64(config.base_delay_secs),
            config.backoff_factor,
        )
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    /// Sleep before retry number `attempt + 1`: `base_delay * backoff_factor^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Run `operation`, retrying failures whose [`Retryable::is_retryable`] is true.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    execute_when(policy, |err: &E| err.is_retryable(), operation).await
}

/// Like [`execute`] with an explicit retry predicate. The last error is returned unchanged.
pub async fn execute_when<T, E, F, Fut, P>(policy: &RetryPolicy, should_retry: P, mut operation: F) -> Result<T, E>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if should_retry(&err) && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    "Retryable failure: {}",
                    err
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
