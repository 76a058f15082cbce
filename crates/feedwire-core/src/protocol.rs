//! Subscription protocol spoken over a session transport.
//!
//! Inbound: `{"op":"subscribe"|"unsubscribe","topics":[..],"userId"?:".."}`
//!
//! Outbound: `{"op":"subscribed"|"unsubscribed","topics":[..],"timestamp":".."}`
//! or `{"op":"error","message":".."}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request sent by a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Add topics to the session.
    Subscribe {
        /// Topics to add.
        topics: Vec<String>,
        /// Optional user identity to attach to the session.
        #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    /// Remove topics from the session.
    Unsubscribe {
        /// Topics to remove.
        topics: Vec<String>,
        /// Ignored; accepted for symmetry with `subscribe`.
        #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl ClientRequest {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Operation label for logs and metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// A reply sent to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerReply {
    /// Acknowledges a subscribe.
    Subscribed {
        /// Normalized topics now held by the request.
        topics: Vec<String>,
        /// Ack time.
        timestamp: DateTime<Utc>,
    },
    /// Acknowledges an unsubscribe.
    Unsubscribed {
        /// Normalized topics removed.
        topics: Vec<String>,
        /// Ack time.
        timestamp: DateTime<Utc>,
    },
    /// A rejected or malformed request.
    Error {
        /// Human-readable cause.
        message: String,
    },
}

impl ServerReply {
    /// Subscribe ack stamped now.
    pub fn subscribed(topics: Vec<String>) -> Self {
        Self::Subscribed {
            topics,
            timestamp: Utc::now(),
        }
    }

    /// Unsubscribe ack stamped now.
    pub fn unsubscribed(topics: Vec<String>) -> Self {
        Self::Unsubscribed {
            topics,
            timestamp: Utc::now(),
        }
    }

    /// Error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Errors decoding inbound frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON, or not a known request shape.
    #[error("malformed request: {0}")]
    Malformed(String),
}
