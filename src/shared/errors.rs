//! Error handling for the data layer

use std::time::Duration;
use thiserror::Error;

/// Failure reported by an upstream collaborator or by the layer in front of it.
///
/// `Clone` because one deduplicated fetch hands the same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The queried entity does not exist upstream (often transient).
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by upstream{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response payload: {0}")]
    Decode(String),

    /// A required secret or setting is missing; the call is never attempted.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}ms)", delay.as_millis()),
        None => String::new(),
    }
}

impl ApiError {
    /// Whether the cache's retry envelope should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Upstream { .. } | ApiError::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Failure reported by the wallet connector
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Wallet connector error: {0}")]
pub struct ConnectorError(pub String);

/// Errors raised while loading application configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_upstream_and_transport_are_retryable() {
        assert!(ApiError::Transport("reset".into()).is_retryable());
        assert!(ApiError::Upstream { status: 502, message: "bad gateway".into() }.is_retryable());
        assert!(!ApiError::NotFound("0.0.7".into()).is_retryable());
        assert!(!ApiError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ApiError::Configuration("missing key".into()).is_retryable());
        assert!(!ApiError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn rate_limited_message_mentions_retry_after() {
        let err = ApiError::RateLimited { retry_after: Some(Duration::from_millis(1500)) };
        assert_eq!(err.to_string(), "Rate limited by upstream (retry after 1500ms)");

        let err = ApiError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limited by upstream");
    }
}
