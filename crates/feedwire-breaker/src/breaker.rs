//! The circuit breaker state machine.
//!
//! - `Closed`: calls run under the per-call timeout and feed the rolling window.
//!   Once the window holds at least `volume_threshold` calls and its error rate
//!   exceeds `error_threshold_pct`, the breaker opens.
//! - `Open`: calls are rejected without invoking the operation, served by the
//!   fallback when one is registered. The first call after `reset_timeout`
//!   moves the breaker to `HalfOpen` and becomes the probe.
//! - `HalfOpen`: exactly one probe is in flight. Concurrent calls are rejected,
//!   never queued. Probe success closes the breaker and clears the window;
//!   probe failure reopens it and restarts the timer.
//!
//! The breaker never retries.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::errors::BreakerError;
use crate::events::{BreakerEvent, BreakerEventKind};
use crate::window::RollingWindow;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An asynchronous operation protected by a breaker.
///
/// Implemented for any `Fn(A) -> impl Future<Output = anyhow::Result<T>>`.
#[async_trait]
pub trait Operation<A, T>: Send + Sync {
    /// Run the operation once.
    async fn call(&self, args: A) -> anyhow::Result<T>;
}

#[async_trait]
impl<A, T, F, Fut> Operation<A, T> for F
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn call(&self, args: A) -> anyhow::Result<T> {
        (self)(args).await
    }
}

/// Externally visible breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A single probe decides whether to close.
    HalfOpen,
}

impl BreakerState {
    /// Snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Snapshot of a breaker's state and counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: BreakerState,
    /// Calls to `execute`.
    pub fires: u64,
    /// Operation successes.
    pub successes: u64,
    /// Operation failures, timeouts included.
    pub failures: u64,
    /// Operation timeouts.
    pub timeouts: u64,
    /// Calls rejected without invoking the operation.
    pub rejects: u64,
    /// Rejected calls served by the fallback.
    pub fallbacks: u64,
    /// Transitions to `Open`.
    pub opens: u64,
    /// Successes in the live rolling window.
    pub window_successes: u32,
    /// Failures in the live rolling window.
    pub window_failures: u32,
    /// Whether the breaker has been shut down.
    pub shutdown: bool,
}

/// Type-erased view of a breaker used by the registry.
pub trait BreakerHandle: Send + Sync {
    /// Breaker name.
    fn name(&self) -> &str;
    /// Current state.
    fn state(&self) -> BreakerState;
    /// Snapshot of counters.
    fn stats(&self) -> BreakerStats;
    /// Force `Closed` and zero every counter.
    fn reset(&self);
    /// Trip manually.
    fn force_open(&self);
    /// Refuse all further calls.
    fn shutdown(&self);
}

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

impl CircuitState {
    fn public(self) -> BreakerState {
        match self {
            Self::Closed => BreakerState::Closed,
            Self::Open { .. } => BreakerState::Open,
            Self::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

struct Inner {
    state: CircuitState,
    window: RollingWindow,
    probe_in_flight: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Counters {
    fires: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    rejects: AtomicU64,
    fallbacks: AtomicU64,
    opens: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    fn zero(&self) {
        for c in [
            &self.fires,
            &self.successes,
            &self.failures,
            &self.timeouts,
            &self.rejects,
            &self.fallbacks,
            &self.opens,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

enum Admission {
    Normal,
    Probe,
    Rejected,
    Shutdown,
}

/// Releases the half-open probe slot if the probe future is dropped before
/// it records an outcome.
struct ProbeGuard<'a> {
    inner: &'a Mutex<Inner>,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().probe_in_flight = false;
        }
    }
}

/// A circuit breaker around one [`Operation`] taking `A` and producing `T`.
pub struct CircuitBreaker<A, T> {
    name: Arc<str>,
    config: BreakerConfig,
    operation: Box<dyn Operation<A, T>>,
    fallback: Option<Box<dyn Operation<A, T>>>,
    inner: Mutex<Inner>,
    counters: Counters,
    events: broadcast::Sender<BreakerEvent>,
}

impl<A, T> CircuitBreaker<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    /// Create a breaker. The config is validated here and nowhere else.
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        operation: impl Operation<A, T> + 'static,
    ) -> Result<Self, BreakerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let window = RollingWindow::new(config.rolling_buckets, config.rolling_window);
        Ok(Self {
            name: Arc::from(name.into()),
            config,
            operation: Box::new(operation),
            fallback: None,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window,
                probe_in_flight: false,
                shutdown: false,
            }),
            counters: Counters::default(),
            events,
        })
    }

    /// Serve rejected calls from `fallback`.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Operation<A, T> + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Publish events on a shared channel instead of the breaker's own.
    #[must_use]
    pub fn with_events(mut self, events: broadcast::Sender<BreakerEvent>) -> Self {
        self.events = events;
        self
    }

    /// Subscribe to this breaker's events.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// The config this breaker was created with.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run the protected operation through the breaker.
    pub async fn execute(&self, args: A) -> Result<T, BreakerError> {
        Counters::bump(&self.counters.fires);

        let mut guard = match self.admit() {
            Admission::Normal => None,
            Admission::Probe => Some(ProbeGuard {
                inner: &self.inner,
                armed: true,
            }),
            Admission::Rejected => return self.reject(args).await,
            Admission::Shutdown => {
                return Err(BreakerError::Shutdown {
                    name: self.name.to_string(),
                });
            }
        };
        let is_probe = guard.is_some();

        let outcome = tokio::time::timeout(self.config.timeout, self.operation.call(args)).await;

        let result = match outcome {
            Ok(Ok(value)) => {
                self.on_success(is_probe);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure(is_probe, false);
                Err(BreakerError::Operation {
                    name: self.name.to_string(),
                    error,
                })
            }
            Err(_) => {
                self.on_failure(is_probe, true);
                Err(BreakerError::Timeout {
                    name: self.name.to_string(),
                    timeout: self.config.timeout,
                })
            }
        };
        if let Some(g) = guard.as_mut() {
            g.disarm();
        }
        result
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Admission::Shutdown;
        }
        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open, probing");
                    self.transition(BreakerState::HalfOpen, BreakerEventKind::HalfOpened);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    async fn reject(&self, args: A) -> Result<T, BreakerError> {
        Counters::bump(&self.counters.rejects);
        self.emit(BreakerEventKind::Reject);
        debug!(breaker = %self.name, "call rejected");

        let Some(fallback) = &self.fallback else {
            return Err(BreakerError::Open {
                name: self.name.to_string(),
            });
        };
        Counters::bump(&self.counters.fallbacks);
        self.emit(BreakerEventKind::Fallback);
        fallback
            .call(args)
            .await
            .map_err(|error| BreakerError::Fallback {
                name: self.name.to_string(),
                error,
            })
    }

    fn on_success(&self, is_probe: bool) {
        Counters::bump(&self.counters.successes);
        self.emit(BreakerEventKind::Success);

        let mut inner = self.inner.lock();
        if is_probe {
            inner.probe_in_flight = false;
            if matches!(inner.state, CircuitState::HalfOpen) {
                inner.state = CircuitState::Closed;
                inner.window.clear();
                info!(breaker = %self.name, "circuit closed after successful probe");
                self.transition(BreakerState::Closed, BreakerEventKind::Closed);
            }
            return;
        }
        inner.window.record_success(Instant::now());
    }

    fn on_failure(&self, is_probe: bool, timed_out: bool) {
        Counters::bump(&self.counters.failures);
        if timed_out {
            Counters::bump(&self.counters.timeouts);
            self.emit(BreakerEventKind::Timeout);
        }
        self.emit(BreakerEventKind::Failure);

        let now = Instant::now();
        let mut inner = self.inner.lock();
        if is_probe {
            inner.probe_in_flight = false;
            if matches!(inner.state, CircuitState::HalfOpen) {
                warn!(breaker = %self.name, "probe failed, circuit reopened");
                self.open(&mut inner, now);
            }
            return;
        }

        inner.window.record_failure(now);
        if !matches!(inner.state, CircuitState::Closed) {
            return;
        }
        let counts = inner.window.counts(now);
        if counts.total() >= self.config.volume_threshold
            && counts.exceeds(self.config.error_threshold_pct)
        {
            warn!(
                breaker = %self.name,
                failures = counts.failures,
                total = counts.total(),
                reset_secs = self.config.reset_timeout.as_secs(),
                "circuit opened"
            );
            self.open(&mut inner, now);
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open { since: now };
        Counters::bump(&self.counters.opens);
        self.transition(BreakerState::Open, BreakerEventKind::Opened);
    }

    fn transition(&self, state: BreakerState, kind: BreakerEventKind) {
        gauge!("feedwire_breaker_state", "breaker" => self.name.to_string())
            .set(state.gauge_value());
        self.emit(kind);
    }

    fn emit(&self, kind: BreakerEventKind) {
        counter!(
            "feedwire_breaker_events_total",
            "breaker" => self.name.to_string(),
            "event" => kind.as_str()
        )
        .increment(1);
        // No receivers is fine.
        let _ = self.events.send(BreakerEvent {
            breaker: self.name.clone(),
            kind,
        });
    }
}

impl<A, T> BreakerHandle for CircuitBreaker<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> BreakerState {
        self.inner.lock().state.public()
    }

    fn stats(&self) -> BreakerStats {
        let (state, window, shutdown) = {
            let mut inner = self.inner.lock();
            let counts = inner.window.counts(Instant::now());
            (inner.state.public(), counts, inner.shutdown)
        };
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BreakerStats {
            name: self.name.to_string(),
            state,
            fires: load(&self.counters.fires),
            successes: load(&self.counters.successes),
            failures: load(&self.counters.failures),
            timeouts: load(&self.counters.timeouts),
            rejects: load(&self.counters.rejects),
            fallbacks: load(&self.counters.fallbacks),
            opens: load(&self.counters.opens),
            window_successes: window.successes,
            window_failures: window.failures,
            shutdown,
        }
    }

    fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = CircuitState::Closed;
            inner.window.clear();
            inner.probe_in_flight = false;
        }
        self.counters.zero();
        info!(breaker = %self.name, "circuit manually reset");
        self.transition(BreakerState::Closed, BreakerEventKind::Closed);
    }

    fn force_open(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, CircuitState::Open { .. }) {
            return;
        }
        warn!(breaker = %self.name, "circuit forced open");
        self.open(&mut inner, Instant::now());
    }

    fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        info!(breaker = %self.name, "circuit shut down");
    }
}
