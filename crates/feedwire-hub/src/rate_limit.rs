//! Fixed-window rate limiting.
//!
//! One counter and one window start per session and direction. The counter
//! resets once a full window has elapsed since the window started.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A cap of `max` events per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Events allowed per window.
    pub max: u32,
    /// Window length.
    #[serde(with = "secs")]
    pub window: Duration,
}

impl RateLimit {
    /// `max` events per `window`.
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    /// Default inbound policy: 10 subscribe requests per minute.
    pub const fn inbound_default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    /// Default outbound policy: 600 messages per minute.
    pub const fn outbound_default() -> Self {
        Self::new(600, Duration::from_secs(60))
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Counter for one direction of one session.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    limit: RateLimit,
    count: u32,
    window_start: Instant,
}

impl FixedWindow {
    /// Start an empty window at `now`.
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            limit,
            count: 0,
            window_start: now,
        }
    }

    /// Take one unit of budget. Returns `false` when the window is exhausted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.count >= self.limit.max {
            return false;
        }
        self.count += 1;
        true
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.limit.window {
            self.count = 0;
            self.window_start = now;
        }
    }
}
