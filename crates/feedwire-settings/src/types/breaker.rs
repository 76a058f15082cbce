//! Circuit breaker settings, keyed by breaker name.

use std::time::Duration;

use feedwire_breaker::BreakerConfig;
use serde::{Deserialize, Serialize};

/// One breaker's thresholds. Durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Error percentage that trips the breaker.
    pub error_threshold_pct: u8,
    /// Buckets in the rolling window.
    pub rolling_buckets: u32,
    /// Rolling window span.
    pub rolling_window_ms: u64,
    /// Time spent open before a probe.
    pub reset_timeout_ms: u64,
    /// Minimum calls in the window before tripping.
    pub volume_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = BreakerConfig::default();
        Self {
            timeout_ms: millis(config.timeout),
            error_threshold_pct: config.error_threshold_pct,
            rolling_buckets: config.rolling_buckets,
            rolling_window_ms: millis(config.rolling_window),
            reset_timeout_ms: millis(config.reset_timeout),
            volume_threshold: config.volume_threshold,
        }
    }
}

impl BreakerSettings {
    /// Runtime breaker configuration. Not validated here; the breaker
    /// validates on creation.
    pub fn to_config(&self) -> BreakerConfig {
        BreakerConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            error_threshold_pct: self.error_threshold_pct,
            rolling_buckets: self.rolling_buckets,
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            volume_threshold: self.volume_threshold,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
