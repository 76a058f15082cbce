//! Server error types.

use feedwire_breaker::BreakerError;
use thiserror::Error;

/// Errors raised while assembling or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A feed's breaker could not be created.
    #[error(transparent)]
    Breaker(#[from] BreakerError),
    /// The HTTP client for feed polling could not be built.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// Result alias for server setup.
pub type Result<T> = std::result::Result<T, ServerError>;
