//! # feedwire-hub
//!
//! Subscription-based fan-out for long-lived sessions.
//!
//! - [`registry`]: sessions and the topic index, mutated together under one lock
//! - [`queue`]: priority-ordered dispatch queue (priority first, FIFO within)
//! - [`rate_limit`]: fixed-window counters for inbound and outbound budgets
//! - [`hub`]: the dispatcher tying registry, queue, cache and stats together
//! - [`reaper`]: periodic removal of idle sessions
//! - [`cache`]: best-effort topic snapshots for subscriber catch-up
//! - [`transport`]: what the hub needs from a connection

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod hub;
pub mod queue;
pub mod rate_limit;
pub mod reaper;
pub mod registry;
pub mod stats;
pub mod transport;

pub use cache::{MemoryCache, TopicCache};
pub use config::HubConfig;
pub use errors::{CacheError, DeliveryError, HubError, Result};
pub use hub::{DispatchReport, Hub, ShutdownReport};
pub use queue::DispatchQueue;
pub use rate_limit::{FixedWindow, RateLimit};
pub use reaper::{reap_once, spawn_reaper};
pub use registry::{
    ClassCounts, DeliveryReport, SessionClass, SessionInfo, SessionRegistry, SubscribeOutcome,
};
pub use stats::HubStats;
pub use transport::{ChannelTransport, SessionTransport};
