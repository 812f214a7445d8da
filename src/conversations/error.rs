//! Error types for the synchronization core.

use thiserror::Error;

use super::cache::CacheError;

/// Errors surfaced by the remote conversation gateway.
///
/// Variants are string-backed and `Clone` so a refresh outcome can be
/// broadcast verbatim to every caller that joined the in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Transport-level failure (connect, DNS, TLS, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response carrying a structured message.
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The conversation no longer exists on the backend.
    #[error("conversation not found")]
    NotFound,

    /// The response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Get retry delay in seconds if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::Timeout => Some(5),
            Self::Network(_) => Some(2),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors recorded by the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A gateway call failed; the triggering optimistic mutation was rolled back.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Side-cache access failed.
    #[error("side cache error: {0}")]
    Cache(#[from] CacheError),

    /// Invalid configuration or unsupported values.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result alias for store operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Network("connection refused".to_string()).is_retryable());
        assert!(
            !GatewayError::Rejected {
                status: 422,
                message: "title must not be empty".to_string(),
            }
            .is_retryable()
        );
        assert_eq!(GatewayError::NotFound.retry_delay(), None);
        assert_eq!(GatewayError::Timeout.retry_delay(), Some(5));
    }
}
