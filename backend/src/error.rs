//! Error types shared by the provider clients, the retry executor and startup.

use std::time::Duration;
use thiserror::Error;

/// Failure of a signed provider call.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Timeout, refused connection or reset before a response arrived
    #[error("Transport error: {0}")]
    Transport(String),
    /// Provider answered with a non-2xx status
    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

impl CloudError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Transport(_))
    }

    pub fn error_code(&self) -> &str {
        match self {
            CloudError::Transport(_) => "TRANSPORT_ERROR",
            CloudError::Api { code, .. } => code,
            CloudError::Decode(_) => "DECODE_ERROR",
            CloudError::InvalidRequest(_) => "INVALID_REQUEST",
            CloudError::Endpoint(_) => "INVALID_ENDPOINT",
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CloudError::Decode(err.to_string())
        } else if err.is_builder() {
            CloudError::InvalidRequest(err.to_string())
        } else {
            CloudError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for CloudError {
    fn from(err: url::ParseError) -> Self {
        CloudError::Endpoint(err.to_string())
    }
}

/// Outcome of waiting on a remote job that did not reach SUCCESS or FAIL.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// Job still in progress when the wait ceiling was reached. Not a failure.
    #[error("Job {job_id} did not finish within {elapsed:?}")]
    Timeout { job_id: String, elapsed: Duration },
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
