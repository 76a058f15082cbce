//! Upstream feeds polled into the hub.

use feedwire_core::{MessageKind, Priority};
use serde::{Deserialize, Serialize};

/// One upstream JSON endpoint and where its payloads go.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSettings {
    /// Feed name, used in logs.
    pub name: String,
    /// Endpoint polled with `GET`.
    pub url: String,
    /// Topic the payloads are published to.
    pub topic: String,
    /// Message kind stamped on each payload.
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
    /// Poll interval.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Breaker guarding the endpoint. Defaults to the feed name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<String>,
}

impl FeedSettings {
    /// Name of the breaker this feed calls through.
    pub fn breaker_name(&self) -> &str {
        self.breaker.as_deref().unwrap_or(&self.name)
    }
}

fn default_kind() -> MessageKind {
    MessageKind::MarketData
}

fn default_interval_ms() -> u64 {
    1_000
}
