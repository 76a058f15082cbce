//! Breaker configuration.

use std::time::Duration;

use crate::errors::BreakerError;

/// Every recognised breaker option with its default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Per-call timeout. Elapsing counts as a failure.
    pub timeout: Duration,
    /// Error percentage (1..=100) that trips the breaker.
    pub error_threshold_pct: u8,
    /// Number of buckets in the rolling window.
    pub rolling_buckets: u32,
    /// Total span of the rolling window.
    pub rolling_window: Duration,
    /// How long to stay open before letting a probe through.
    pub reset_timeout: Duration,
    /// Minimum calls in the window before the breaker may trip.
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            error_threshold_pct: 50,
            rolling_buckets: 10,
            rolling_window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            volume_threshold: 3,
        }
    }
}

impl BreakerConfig {
    /// Check the config once, at breaker creation.
    pub fn validate(&self) -> Result<(), BreakerError> {
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be greater than zero"));
        }
        if self.error_threshold_pct == 0 || self.error_threshold_pct > 100 {
            return Err(invalid(format!(
                "error_threshold_pct must be within 1..=100, got {}",
                self.error_threshold_pct
            )));
        }
        if self.rolling_buckets == 0 {
            return Err(invalid("rolling_buckets must be greater than zero"));
        }
        if self.rolling_window.as_millis() < u128::from(self.rolling_buckets) {
            return Err(invalid(format!(
                "rolling_window ({:?}) is too short for {} buckets",
                self.rolling_window, self.rolling_buckets
            )));
        }
        if self.reset_timeout.is_zero() {
            return Err(invalid("reset_timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> BreakerError {
    BreakerError::InvalidConfig(msg.into())
}
