//! Hub configuration.

use std::time::Duration;

use crate::rate_limit::RateLimit;

/// Default per-session topic cap.
pub const DEFAULT_MAX_TOPICS: usize = 50;
/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Limits and timings for a [`Hub`](crate::Hub).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Maximum topics a single session may hold.
    pub max_topics_per_session: usize,
    /// Messages the dispatch queue may buffer.
    pub queue_capacity: usize,
    /// Per-session subscribe budget.
    pub inbound: RateLimit,
    /// Per-session delivery budget.
    pub outbound: RateLimit,
    /// How often the reaper sweeps.
    pub reaper_interval: Duration,
    /// Idle time after which a session is reaped.
    pub inactivity_threshold: Duration,
    /// TTL for topic snapshots written to the cache.
    pub cache_ttl: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_topics_per_session: DEFAULT_MAX_TOPICS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            inbound: RateLimit::inbound_default(),
            outbound: RateLimit::outbound_default(),
            reaper_interval: Duration::from_secs(60),
            inactivity_threshold: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(30),
        }
    }
}
