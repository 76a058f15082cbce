//! Hub error types.

use feedwire_core::{ProtocolError, SessionId};
use thiserror::Error;

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Rejections surfaced to the requester. None of these are fatal to the hub.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// No session with this id (never connected, or already disconnected).
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Inbound request budget exhausted for the current window.
    #[error("rate limited: at most {max} subscribe requests per {window_secs}s")]
    RateLimited {
        /// Requests allowed per window.
        max: u32,
        /// Window length in seconds.
        window_secs: u64,
    },

    /// The subscription would exceed the per-session topic cap.
    #[error("subscription limit reached: {requested} topics exceeds the maximum of {max}")]
    Capacity {
        /// Per-session maximum.
        max: usize,
        /// Topics the session would hold after the request.
        requested: usize,
    },

    /// Topic failed validation.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// Topic as received.
        topic: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The dispatch queue is at capacity.
    #[error("dispatch queue full ({capacity} messages)")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// The hub no longer accepts work.
    #[error("hub is shutting down")]
    ShuttingDown,

    /// The inbound frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HubError {
    /// Short label for metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::RateLimited { .. } => "rate_limited",
            Self::Capacity { .. } => "capacity",
            Self::InvalidTopic { .. } => "invalid_topic",
            Self::QueueFull { .. } => "queue_full",
            Self::ShuttingDown => "shutting_down",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Why a frame could not be handed to a transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound buffer is full; the peer is not keeping up.
    #[error("transport buffer full")]
    Full,
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

impl DeliveryError {
    /// Short label for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// Cache collaborator failures. Always advisory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backing store could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
