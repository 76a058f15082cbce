//! Breaker error types.

use std::time::Duration;

use thiserror::Error;

/// Result alias for breaker operations.
pub type Result<T> = std::result::Result<T, BreakerError>;

/// Everything a protected call or the registry can fail with.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker rejected the call and no fallback was registered.
    #[error("service degraded: circuit '{name}' is open")]
    Open {
        /// Breaker name.
        name: String,
    },

    /// The operation did not finish within the per-call timeout.
    #[error("circuit '{name}' call timed out after {timeout:?}")]
    Timeout {
        /// Breaker name.
        name: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The operation returned an error.
    #[error("circuit '{name}' call failed: {error:#}")]
    Operation {
        /// Breaker name.
        name: String,
        /// Error returned by the operation.
        error: anyhow::Error,
    },

    /// The fallback itself failed while serving a rejected call.
    #[error("circuit '{name}' fallback failed: {error:#}")]
    Fallback {
        /// Breaker name.
        name: String,
        /// Error returned by the fallback.
        error: anyhow::Error,
    },

    /// The breaker has been shut down.
    #[error("circuit '{name}' is shut down")]
    Shutdown {
        /// Breaker name.
        name: String,
    },

    /// Config failed validation.
    #[error("invalid breaker config: {0}")]
    InvalidConfig(String),

    /// A breaker with this name is already registered.
    #[error("breaker '{0}' is already registered")]
    Duplicate(String),

    /// No breaker with this name.
    #[error("breaker '{0}' not found")]
    NotFound(String),
}

impl BreakerError {
    /// Short label for metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Timeout { .. } => "timeout",
            Self::Operation { .. } => "operation",
            Self::Fallback { .. } => "fallback",
            Self::Shutdown { .. } => "shutdown",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Duplicate(_) => "duplicate",
            Self::NotFound(_) => "not_found",
        }
    }
}
