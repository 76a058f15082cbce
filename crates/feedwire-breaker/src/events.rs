//! Typed breaker notifications.

use std::sync::Arc;

use serde::Serialize;

/// What happened on a breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerEventKind {
    /// Tripped to `Open`.
    Opened,
    /// Moved to `HalfOpen`; a probe is about to run.
    HalfOpened,
    /// Returned to `Closed`.
    Closed,
    /// The operation succeeded.
    Success,
    /// The operation failed (error or timeout).
    Failure,
    /// A call was rejected without invoking the operation.
    Reject,
    /// The operation timed out.
    Timeout,
    /// A rejected call was served by the fallback.
    Fallback,
}

impl BreakerEventKind {
    /// Snake-case label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::HalfOpened => "half_opened",
            Self::Closed => "closed",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Reject => "reject",
            Self::Timeout => "timeout",
            Self::Fallback => "fallback",
        }
    }
}

/// A notification published by a breaker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerEvent {
    /// Name of the breaker that emitted the event.
    pub breaker: Arc<str>,
    /// Event kind.
    pub kind: BreakerEventKind,
}
