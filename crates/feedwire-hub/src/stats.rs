//! Dispatch counters and the hub's observability snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::registry::{ClassCounts, DeliveryReport};

// Metric names emitted through the `metrics` facade.

/// Active sessions (gauge, labels: class).
pub const SESSIONS_ACTIVE: &str = "feedwire_sessions_active";
/// Sessions removed by the reaper (counter).
pub const SESSIONS_REAPED_TOTAL: &str = "feedwire_sessions_reaped_total";
/// Subscribe/unsubscribe requests rejected (counter, labels: reason).
pub const REQUESTS_REJECTED_TOTAL: &str = "feedwire_requests_rejected_total";
/// Messages popped from the queue (counter, labels: kind, priority).
pub const MESSAGES_DISPATCHED_TOTAL: &str = "feedwire_messages_dispatched_total";
/// Frames handed to transports (counter).
pub const DELIVERIES_TOTAL: &str = "feedwire_deliveries_total";
/// Deliveries skipped or refused (counter, labels: reason).
pub const DELIVERY_ERRORS_TOTAL: &str = "feedwire_delivery_errors_total";
/// Enqueue-to-dispatch latency (histogram, seconds).
pub const DISPATCH_LATENCY_SECONDS: &str = "feedwire_dispatch_latency_seconds";
/// Pending messages (gauge).
pub const QUEUE_DEPTH: &str = "feedwire_queue_depth";
/// Topics with at least one subscriber (gauge).
pub const TOPICS_ACTIVE: &str = "feedwire_topics_active";

const METER_SPAN: Duration = Duration::from_secs(60);

/// Per-second buckets covering the last minute.
#[derive(Debug, Default)]
struct MinuteMeter {
    buckets: VecDeque<(Instant, u64)>,
}

impl MinuteMeter {
    fn record(&mut self, now: Instant, n: u64) {
        self.evict(now);
        if let Some((start, count)) = self.buckets.back_mut() {
            if now.saturating_duration_since(*start) < Duration::from_secs(1) {
                *count += n;
                return;
            }
        }
        self.buckets.push_back((now, n));
    }

    fn total(&mut self, now: Instant) -> u64 {
        self.evict(now);
        self.buckets.iter().map(|(_, n)| n).sum()
    }

    fn evict(&mut self, now: Instant) {
        while self
            .buckets
            .front()
            .is_some_and(|(start, _)| now.saturating_duration_since(*start) >= METER_SPAN)
        {
            let _ = self.buckets.pop_front();
        }
    }
}

/// Running totals kept by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    dispatched: AtomicU64,
    deliveries: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    reaped: AtomicU64,
    latency_micros_total: AtomicU64,
    sent_last_minute: Mutex<MinuteMeter>,
}

impl DispatchStats {
    pub(crate) fn record_dispatch(&self, report: &DeliveryReport, latency: Duration) {
        let _ = self.dispatched.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        let _ = self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        let _ = self
            .rate_limited
            .fetch_add(report.rate_limited as u64, Ordering::Relaxed);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let _ = self
            .latency_micros_total
            .fetch_add(micros, Ordering::Relaxed);
        self.sent_last_minute
            .lock()
            .record(Instant::now(), report.delivered as u64);
    }

    pub(crate) fn record_reaped(&self, n: usize) {
        let _ = self.reaped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        sessions: ClassCounts,
        topics: BTreeMap<String, usize>,
        queue_depth: usize,
    ) -> HubStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let dispatched = load(&self.dispatched);
        let deliveries = load(&self.deliveries);
        let failed = load(&self.failed);
        let rate_limited = load(&self.rate_limited);
        let errors = failed + rate_limited;
        let attempts = deliveries + errors;

        #[allow(clippy::cast_precision_loss)]
        let error_rate = if attempts == 0 {
            0.0
        } else {
            errors as f64 / attempts as f64
        };
        #[allow(clippy::cast_precision_loss)]
        let avg_dispatch_latency_ms = if dispatched == 0 {
            0.0
        } else {
            load(&self.latency_micros_total) as f64 / dispatched as f64 / 1000.0
        };

        HubStats {
            sessions: sessions.interactive + sessions.machine,
            sessions_by_class: sessions,
            topic_subscribers: topics,
            queue_depth,
            messages_dispatched: dispatched,
            deliveries,
            delivery_errors: errors,
            rate_limited,
            messages_per_minute: self.sent_last_minute.lock().total(Instant::now()),
            error_rate,
            avg_dispatch_latency_ms,
            sessions_reaped: load(&self.reaped),
        }
    }
}

/// Point-in-time view of the hub.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HubStats {
    /// Live sessions.
    pub sessions: usize,
    /// Live sessions by class.
    pub sessions_by_class: ClassCounts,
    /// Subscriber count per topic.
    pub topic_subscribers: BTreeMap<String, usize>,
    /// Messages waiting in the queue.
    pub queue_depth: usize,
    /// Messages popped and fanned out.
    pub messages_dispatched: u64,
    /// Frames handed to transports.
    pub deliveries: u64,
    /// Deliveries skipped (rate limit) or refused (transport).
    pub delivery_errors: u64,
    /// Deliveries skipped for spent outbound budget.
    pub rate_limited: u64,
    /// Frames delivered over the last 60 seconds.
    pub messages_per_minute: u64,
    /// `delivery_errors / (deliveries + delivery_errors)`.
    pub error_rate: f64,
    /// Mean time from message creation to fan-out.
    pub avg_dispatch_latency_ms: f64,
    /// Sessions removed by the reaper.
    pub sessions_reaped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(delivered: usize, failed: usize, rate_limited: usize) -> DeliveryReport {
        DeliveryReport {
            targets: delivered + failed + rate_limited,
            delivered,
            rate_limited,
            failed,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn meter_forgets_after_a_minute() {
        let mut meter = MinuteMeter::default();
        let t0 = Instant::now();
        meter.record(t0, 5);
        meter.record(t0 + Duration::from_millis(500), 2);
        meter.record(t0 + Duration::from_secs(30), 3);
        assert_eq!(meter.total(t0 + Duration::from_secs(31)), 10);
        assert_eq!(meter.total(t0 + Duration::from_secs(60)), 3);
        assert_eq!(meter.total(t0 + Duration::from_secs(95)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_rates() {
        let stats = DispatchStats::default();
        stats.record_dispatch(&report(3, 1, 0), Duration::from_millis(4));
        stats.record_dispatch(&report(0, 0, 0), Duration::from_millis(2));
        stats.record_reaped(2);

        let snap = stats.snapshot(ClassCounts::default(), BTreeMap::new(), 0);
        assert_eq!(snap.messages_dispatched, 2);
        assert_eq!(snap.deliveries, 3);
        assert_eq!(snap.delivery_errors, 1);
        assert!((snap.error_rate - 0.25).abs() < 1e-9);
        assert!((snap.avg_dispatch_latency_ms - 3.0).abs() < 1e-9);
        assert_eq!(snap.messages_per_minute, 3);
        assert_eq!(snap.sessions_reaped, 2);
    }

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let stats = DispatchStats::default();
        let snap = stats.snapshot(ClassCounts::default(), BTreeMap::new(), 0);
        assert!(snap.error_rate.abs() < f64::EPSILON);
        assert!(snap.avg_dispatch_latency_ms.abs() < f64::EPSILON);
    }
}
