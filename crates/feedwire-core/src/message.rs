//! Broadcast messages and the envelope delivered to sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery priority. Variant order is significant: `Critical` sorts highest.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background data, delivered last.
    Low,
    /// Default for regular ticks.
    #[default]
    Medium,
    /// Time-sensitive updates.
    High,
    /// Always first in the queue.
    Critical,
}

impl Priority {
    /// Lowercase label used on the wire and in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// What a broadcast message carries. Serialized as the envelope `type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Raw quotes, ticks, depth.
    MarketData,
    /// Analytics computed from market data by some producer.
    DerivedPayload,
    /// User-facing alerts.
    Alert,
    /// Server notices, usually sent to every session.
    System,
}

impl MessageKind {
    /// Snake-case label used on the wire and in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::DerivedPayload => "derived_payload",
            Self::Alert => "alert",
            Self::System => "system",
        }
    }
}

/// A message waiting in the dispatch queue.
///
/// Messages without a topic go to every connected session.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastMessage {
    /// Message kind.
    pub kind: MessageKind,
    /// Target topic, normalized to uppercase by the hub.
    pub topic: Option<String>,
    /// Opaque payload.
    pub payload: Value,
    /// When the producer created the message.
    pub created_at: DateTime<Utc>,
    /// Delivery priority.
    pub priority: Priority,
}

impl BroadcastMessage {
    /// Create a message with `Medium` priority.
    pub fn new(kind: MessageKind, topic: Option<String>, payload: Value) -> Self {
        Self {
            kind,
            topic,
            payload,
            created_at: Utc::now(),
            priority: Priority::Medium,
        }
    }

    /// Market data for a single topic.
    pub fn market_data(topic: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::MarketData, Some(topic.into()), payload)
    }

    /// A topic-less system notice for every session.
    pub fn system(payload: Value) -> Self {
        Self::new(MessageKind::System, None, payload)
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Borrow this message as a wire envelope.
    pub fn envelope(&self) -> Envelope<'_> {
        Envelope {
            kind: self.kind,
            topic: self.topic.as_deref(),
            payload: &self.payload,
            timestamp: self.created_at,
            priority: self.priority,
        }
    }
}

/// Wire shape of a delivered message:
/// `{type, topic?, payload, timestamp, priority}`.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Topic, omitted for broadcast-to-all messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<&'a str>,
    /// Payload.
    pub payload: &'a Value,
    /// Creation time (RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// Priority label.
    pub priority: Priority,
}

impl Envelope<'_> {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
