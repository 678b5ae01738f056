//! Remote storage error types

use std::time::Duration;
use thiserror::Error;

use crate::core::retry::Retryable;

/// Errors that can occur while talking to the remote store
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network/transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected or token refresh failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Conditional write lost against a newer remote revision
    #[error("Remote revision conflict at {0}")]
    Conflict(String),

    /// Rate limited by the remote
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success API response
    #[error("API error {status}: {summary}")]
    Api { status: u16, summary: String },

    /// Response could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Local IO (directory backend)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Short machine-friendly kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Http(_) => "http",
            RemoteError::Auth(_) => "auth",
            RemoteError::Conflict(_) => "conflict",
            RemoteError::RateLimited { .. } => "rate_limited",
            RemoteError::Api { .. } => "api",
            RemoteError::InvalidResponse(_) => "invalid_response",
            RemoteError::Io(_) => "io",
        }
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RemoteError::RateLimited { .. } => true,
            RemoteError::Api { status, .. } => *status >= 500,
            RemoteError::Io(e) => e.is_retryable(),
            RemoteError::Auth(_) | RemoteError::Conflict(_) | RemoteError::InvalidResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Api { status: 503, summary: "x".into() }.is_retryable());
        assert!(!RemoteError::Api { status: 400, summary: "x".into() }.is_retryable());
        assert!(!RemoteError::Conflict("/s".into()).is_retryable());
        assert!(!RemoteError::Auth("bad".into()).is_retryable());

        let limited = RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
    }
}
