//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Section types
//! implement [`Default`] with production values and carry
//! `#[serde(default)]`, so a partial file only needs the keys it changes.

mod breaker;
mod feed;
mod hub;
mod server;

pub use breaker::*;
pub use feed::*;
pub use hub::*;
pub use server::*;

use std::collections::{BTreeMap, HashSet};

use feedwire_breaker::BreakerConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "breakers": { "nse": { "timeoutMs": 5000 } },
///   "feeds": [{ "name": "nse", "url": "http://..", "topic": "NIFTY" }]
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedwireSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Hub limits and timings.
    pub hub: HubSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
    /// Named breakers. Breakers referenced by a feed but missing here use
    /// [`BreakerSettings::default`].
    pub breakers: BTreeMap<String, BreakerSettings>,
    /// Upstream feeds.
    pub feeds: Vec<FeedSettings>,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl FeedwireSettings {
    /// Breaker config for `name`, or the default thresholds if unnamed.
    pub fn breaker_config(&self, name: &str) -> BreakerConfig {
        self.breakers
            .get(name)
            .map(BreakerSettings::to_config)
            .unwrap_or_default()
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(invalid("server.maxConnections must be greater than zero"));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(invalid("server.heartbeatIntervalSecs must be greater than zero"));
        }
        if self.server.send_buffer == 0 {
            return Err(invalid("server.sendBuffer must be greater than zero"));
        }
        if self.hub.queue_capacity == 0 {
            return Err(invalid("hub.queueCapacity must be greater than zero"));
        }
        if self.hub.max_topics_per_session == 0 {
            return Err(invalid("hub.maxTopicsPerSession must be greater than zero"));
        }
        for (dir, limit) in [("inbound", self.hub.inbound), ("outbound", self.hub.outbound)] {
            if limit.max == 0 || limit.window_secs == 0 {
                return Err(invalid(format!(
                    "hub.{dir} needs a non-zero max and windowSecs"
                )));
            }
        }
        if self.hub.reaper_interval_secs == 0 {
            return Err(invalid("hub.reaperIntervalSecs must be greater than zero"));
        }

        for (name, breaker) in &self.breakers {
            breaker
                .to_config()
                .validate()
                .map_err(|e| invalid(format!("breakers.{name}: {e}")))?;
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if !names.insert(feed.name.as_str()) {
                return Err(invalid(format!("duplicate feed name '{}'", feed.name)));
            }
            if feed.url.trim().is_empty() {
                return Err(invalid(format!("feeds.{}: url is empty", feed.name)));
            }
            if feed.interval_ms == 0 {
                return Err(invalid(format!(
                    "feeds.{}: intervalMs must be greater than zero",
                    feed.name
                )));
            }
            let _ = feedwire_hub::registry::normalize_topic(&feed.topic)
                .map_err(|e| invalid(format!("feeds.{}: {e}", feed.name)))?;
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(msg.into())
}
