//! Bucketed rolling window of call outcomes.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Success/failure totals over the live part of the window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowCounts {
    /// Successful calls.
    pub successes: u32,
    /// Failed or timed-out calls.
    pub failures: u32,
}

impl WindowCounts {
    /// Total recorded calls.
    pub fn total(self) -> u32 {
        self.successes + self.failures
    }

    /// Whether the failure share exceeds `threshold_pct`.
    ///
    /// A window where every call failed always exceeds, so a 100% threshold
    /// still trips on total failure.
    pub fn exceeds(self, threshold_pct: u8) -> bool {
        let total = u64::from(self.total());
        if total == 0 {
            return false;
        }
        let failures = u64::from(self.failures);
        failures * 100 > u64::from(threshold_pct) * total || failures == total
    }
}

#[derive(Debug)]
struct Bucket {
    start: Instant,
    counts: WindowCounts,
}

/// A ring of time buckets. Buckets older than the window are evicted lazily
/// on every read and write.
#[derive(Debug)]
pub struct RollingWindow {
    buckets: VecDeque<Bucket>,
    bucket_width: Duration,
    span: Duration,
    capacity: usize,
}

impl RollingWindow {
    /// Create a window of `buckets` buckets spanning `span`.
    pub fn new(buckets: u32, span: Duration) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: VecDeque::with_capacity(buckets as usize),
            bucket_width: span / buckets,
            span,
            capacity: buckets as usize,
        }
    }

    /// Record a success at `now`.
    pub fn record_success(&mut self, now: Instant) {
        self.current(now).successes += 1;
    }

    /// Record a failure at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.current(now).failures += 1;
    }

    /// Totals across all live buckets.
    pub fn counts(&mut self, now: Instant) -> WindowCounts {
        self.evict(now);
        self.buckets
            .iter()
            .fold(WindowCounts::default(), |acc, b| WindowCounts {
                successes: acc.successes + b.counts.successes,
                failures: acc.failures + b.counts.failures,
            })
    }

    /// Drop every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.start) >= self.span {
                let _ = self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&mut self, now: Instant) -> &mut WindowCounts {
        self.evict(now);
        let needs_new = self
            .buckets
            .back()
            .is_none_or(|b| now.saturating_duration_since(b.start) >= self.bucket_width);
        if needs_new {
            if self.buckets.len() == self.capacity {
                let _ = self.buckets.pop_front();
            }
            self.buckets.push_back(Bucket {
                start: now,
                counts: WindowCounts::default(),
            });
        }
        let last = self.buckets.len() - 1;
        &mut self.buckets[last].counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeds_math() {
        let c = WindowCounts {
            successes: 1,
            failures: 1,
        };
        assert!(!c.exceeds(50), "exactly 50% does not exceed 50%");

        let c = WindowCounts {
            successes: 1,
            failures: 2,
        };
        assert!(c.exceeds(50));

        let c = WindowCounts {
            successes: 0,
            failures: 3,
        };
        assert!(c.exceeds(100));

        assert!(!WindowCounts::default().exceeds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_within_span() {
        let mut w = RollingWindow::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        w.record_failure(t0);
        w.record_success(t0 + Duration::from_secs(13));
        w.record_failure(t0 + Duration::from_secs(30));

        let c = w.counts(t0 + Duration::from_secs(31));
        assert_eq!(c.failures, 2);
        assert_eq!(c.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn old_buckets_are_evicted() {
        let mut w = RollingWindow::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        w.record_failure(t0);
        w.record_failure(t0 + Duration::from_secs(40));

        let c = w.counts(t0 + Duration::from_secs(61));
        assert_eq!(c.failures, 1);

        let c = w.counts(t0 + Duration::from_secs(120));
        assert_eq!(c.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_bucket_accumulates() {
        let mut w = RollingWindow::new(10, Duration::from_secs(10));
        let t0 = Instant::now();
        for i in 0..5 {
            w.record_success(t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(w.buckets.len(), 1);
        assert_eq!(w.counts(t0).successes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets() {
        let mut w = RollingWindow::new(3, Duration::from_secs(3));
        let t0 = Instant::now();
        w.record_failure(t0);
        w.clear();
        assert_eq!(w.counts(t0).total(), 0);
    }
}
