//! Fan-out hub settings.

use std::time::Duration;

use feedwire_hub::{HubConfig, RateLimit};
use serde::{Deserialize, Serialize};

/// A cap of `max` events per `window_secs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Events allowed per window.
    pub max: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl From<RateLimit> for RateLimitSettings {
    fn from(limit: RateLimit) -> Self {
        Self {
            max: limit.max,
            window_secs: limit.window.as_secs(),
        }
    }
}

impl From<RateLimitSettings> for RateLimit {
    fn from(s: RateLimitSettings) -> Self {
        RateLimit::new(s.max, Duration::from_secs(s.window_secs))
    }
}

/// Session limits, queue sizing and reaper timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Maximum topics one session may hold.
    pub max_topics_per_session: usize,
    /// Messages the dispatch queue may buffer.
    pub queue_capacity: usize,
    /// Per-session subscribe budget.
    pub inbound: RateLimitSettings,
    /// Per-session delivery budget.
    pub outbound: RateLimitSettings,
    /// Seconds between reaper sweeps.
    pub reaper_interval_secs: u64,
    /// Idle seconds after which a session is reaped.
    pub inactivity_threshold_secs: u64,
    /// Lifetime of cached topic snapshots, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        let config = HubConfig::default();
        Self {
            max_topics_per_session: config.max_topics_per_session,
            queue_capacity: config.queue_capacity,
            inbound: config.inbound.into(),
            outbound: config.outbound.into(),
            reaper_interval_secs: config.reaper_interval.as_secs(),
            inactivity_threshold_secs: config.inactivity_threshold.as_secs(),
            cache_ttl_secs: config.cache_ttl.as_secs(),
        }
    }
}

impl HubSettings {
    /// Runtime hub configuration.
    pub fn to_config(&self) -> HubConfig {
        HubConfig {
            max_topics_per_session: self.max_topics_per_session,
            queue_capacity: self.queue_capacity,
            inbound: self.inbound.into(),
            outbound: self.outbound.into(),
            reaper_interval: Duration::from_secs(self.reaper_interval_secs),
            inactivity_threshold: Duration::from_secs(self.inactivity_threshold_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}
