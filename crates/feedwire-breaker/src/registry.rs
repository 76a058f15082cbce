//! Named breakers, one shared event channel, aggregated health.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::breaker::{BreakerHandle, BreakerState, BreakerStats, CircuitBreaker, Operation};
use crate::config::BreakerConfig;
use crate::errors::{BreakerError, Result};
use crate::events::BreakerEvent;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Aggregated breaker health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// No breaker is open.
    Healthy,
    /// Some, but fewer than half, of the breakers are open.
    Degraded,
    /// Half or more of the breakers are open.
    Critical,
}

/// Health plus the counts it was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: Health,
    /// Registered breakers.
    pub total: usize,
    /// Breakers currently open.
    pub open: usize,
    /// Breakers currently probing.
    pub half_open: usize,
}

impl HealthReport {
    fn from_states(states: impl IntoIterator<Item = BreakerState>) -> Self {
        let (mut total, mut open, mut half_open) = (0, 0, 0);
        for state in states {
            total += 1;
            match state {
                BreakerState::Open => open += 1,
                BreakerState::HalfOpen => half_open += 1,
                BreakerState::Closed => {}
            }
        }
        let status = if open == 0 {
            Health::Healthy
        } else if open * 2 >= total {
            Health::Critical
        } else {
            Health::Degraded
        };
        Self {
            status,
            total,
            open,
            half_open,
        }
    }
}

/// Process-wide set of named breakers.
///
/// Breakers registered here publish their events on the registry's channel.
pub struct BreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<dyn BreakerHandle>>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            breakers: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Create and register a breaker.
    pub fn create<A, T>(
        &self,
        name: &str,
        config: BreakerConfig,
        operation: impl Operation<A, T> + 'static,
    ) -> Result<Arc<CircuitBreaker<A, T>>>
    where
        A: Send + 'static,
        T: Send + 'static,
    {
        self.register(CircuitBreaker::new(name, config, operation)?)
    }

    /// Create and register a breaker with a fallback for rejected calls.
    pub fn create_with_fallback<A, T>(
        &self,
        name: &str,
        config: BreakerConfig,
        operation: impl Operation<A, T> + 'static,
        fallback: impl Operation<A, T> + 'static,
    ) -> Result<Arc<CircuitBreaker<A, T>>>
    where
        A: Send + 'static,
        T: Send + 'static,
    {
        self.register(CircuitBreaker::new(name, config, operation)?.with_fallback(fallback))
    }

    /// Register an already built breaker. Names must be unique.
    pub fn register<A, T>(&self, breaker: CircuitBreaker<A, T>) -> Result<Arc<CircuitBreaker<A, T>>>
    where
        A: Send + 'static,
        T: Send + 'static,
    {
        let breaker = Arc::new(breaker.with_events(self.events.clone()));
        let name = breaker.name().to_owned();
        let mut breakers = self.breakers.write();
        if breakers.contains_key(&name) {
            return Err(BreakerError::Duplicate(name));
        }
        let _ = breakers.insert(name.clone(), breaker.clone() as Arc<dyn BreakerHandle>);
        info!(breaker = %name, "breaker registered");
        Ok(breaker)
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BreakerHandle>> {
        self.breakers.read().get(name).cloned()
    }

    /// Stats for one breaker.
    pub fn get_stats(&self, name: &str) -> Result<BreakerStats> {
        self.get(name)
            .map(|b| b.stats())
            .ok_or_else(|| BreakerError::NotFound(name.to_owned()))
    }

    /// Stats for every breaker, ordered by name.
    pub fn all_stats(&self) -> Vec<BreakerStats> {
        self.breakers.read().values().map(|b| b.stats()).collect()
    }

    /// Manually reset one breaker.
    pub fn reset(&self, name: &str) -> Result<()> {
        let breaker = self
            .get(name)
            .ok_or_else(|| BreakerError::NotFound(name.to_owned()))?;
        breaker.reset();
        Ok(())
    }

    /// Shut every breaker down. Subsequent calls fail with `Shutdown`.
    pub fn shutdown_all(&self) {
        let breakers = self.breakers.read();
        for breaker in breakers.values() {
            breaker.shutdown();
        }
        info!(count = breakers.len(), "all breakers shut down");
    }

    /// Receive events from every registered breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Aggregate health from the fraction of open breakers.
    pub fn health(&self) -> HealthReport {
        HealthReport::from_states(self.breakers.read().values().map(|b| b.state()))
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breaker is registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BreakerEventKind;
    use assert_matches::assert_matches;

    async fn ok(_: ()) -> anyhow::Result<u32> {
        Ok(1)
    }

    async fn fail(_: ()) -> anyhow::Result<u32> {
        anyhow::bail!("boom")
    }

    fn add(registry: &BreakerRegistry, name: &str) -> Arc<CircuitBreaker<(), u32>> {
        registry.create(name, BreakerConfig::default(), ok).unwrap()
    }

    #[test]
    fn empty_registry_is_healthy() {
        let registry = BreakerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.health().status, Health::Healthy);
    }

    #[test]
    fn duplicate_names_rejected() {
        let registry = BreakerRegistry::new();
        let _ = add(&registry, "quotes");
        let err = registry
            .create::<(), u32>("quotes", BreakerConfig::default(), ok)
            .err();
        assert_matches!(err, Some(BreakerError::Duplicate(ref n)) if n == "quotes");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn health_thresholds() {
        let registry = BreakerRegistry::new();
        let breakers: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|n| add(&registry, n))
            .collect();
        assert_eq!(registry.health().status, Health::Healthy);

        breakers[0].force_open();
        let report = registry.health();
        assert_eq!(report.status, Health::Degraded);
        assert_eq!(report.open, 1);

        breakers[1].force_open();
        assert_eq!(registry.health().status, Health::Critical);

        registry.reset("a").unwrap();
        registry.reset("b").unwrap();
        assert_eq!(registry.health().status, Health::Healthy);
    }

    #[test]
    fn reset_unknown_is_not_found() {
        let registry = BreakerRegistry::new();
        assert_matches!(registry.reset("nope"), Err(BreakerError::NotFound(_)));
        assert_matches!(registry.get_stats("nope"), Err(BreakerError::NotFound(_)));
    }

    #[tokio::test]
    async fn events_flow_through_registry_channel() {
        let registry = BreakerRegistry::new();
        let mut rx = registry.subscribe();
        let quotes: Arc<CircuitBreaker<(), u32>> = registry
            .create("quotes", BreakerConfig::default(), fail)
            .unwrap();
        let news = add(&registry, "news");

        for _ in 0..3 {
            let _ = quotes.execute(()).await;
        }
        let _ = news.execute(()).await.unwrap();

        let mut opened = Vec::new();
        let mut successes = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                BreakerEventKind::Opened => opened.push(ev.breaker.to_string()),
                BreakerEventKind::Success => successes.push(ev.breaker.to_string()),
                _ => {}
            }
        }
        assert_eq!(opened, vec!["quotes"]);
        assert_eq!(successes, vec!["news"]);
    }

    #[tokio::test]
    async fn shutdown_all_stops_every_breaker() {
        let registry = BreakerRegistry::new();
        let a = add(&registry, "a");
        let b = add(&registry, "b");
        registry.shutdown_all();
        assert_matches!(a.execute(()).await, Err(BreakerError::Shutdown { .. }));
        assert_matches!(b.execute(()).await, Err(BreakerError::Shutdown { .. }));
        assert!(registry.all_stats().iter().all(|s| s.shutdown));
    }

    #[test]
    fn all_stats_sorted_by_name() {
        let registry = BreakerRegistry::new();
        let _ = add(&registry, "zeta");
        let _ = add(&registry, "alpha");
        let names: Vec<_> = registry.all_stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn stats_serialize_with_state_label() {
        let registry = BreakerRegistry::new();
        let b = add(&registry, "quotes");
        b.force_open();
        let v = serde_json::to_value(registry.get_stats("quotes").unwrap()).unwrap();
        assert_eq!(v["state"], "open");
        assert_eq!(v["opens"], 1);
    }
}
