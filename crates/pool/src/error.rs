//! Error types for the connection pool
use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the pool to its callers
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Opening (or replacing) a connection failed
    #[error("Backend unavailable: {reason}")]
    BackendUnavailable {
        /// The failure reason
        reason: String,
        /// The connector error that caused it
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No connection became available within the caller's bound
    #[error("Timed out after {timeout_ms}ms waiting for a connection ({capacity} in use)")]
    AcquireTimeout {
        /// The timeout that elapsed, in milliseconds
        timeout_ms: u64,
        /// Pool capacity at the time of the timeout
        capacity: usize,
    },

    /// The pool has been shut down
    #[error("Connection pool is closed")]
    Closed,
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap a connector error as `BackendUnavailable`
    pub fn backend<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendUnavailable {
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an acquire timeout error
    pub fn acquire_timeout(timeout: Duration, capacity: usize) -> Self {
        Self::AcquireTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            capacity,
        }
    }

    /// Check if retrying the same operation later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::BackendUnavailable { .. })
    }

    /// `true` for [`Error::AcquireTimeout`]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. })
    }

    /// `true` for [`Error::BackendUnavailable`]
    #[must_use]
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}
