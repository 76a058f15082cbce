//! Upstream feed pollers.
//!
//! Each poller fetches a JSON document on an interval through a named
//! [`CircuitBreaker`] and publishes it to the hub. Feeds that share a breaker
//! name share one breaker, so an exchange outage trips once for all of its
//! endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use feedwire_breaker::{BreakerError, BreakerRegistry, CircuitBreaker, Operation};
use feedwire_core::BroadcastMessage;
use feedwire_hub::{Hub, HubError};
use feedwire_settings::{FeedSettings, FeedwireSettings};
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::metrics::{FEED_POLL_DURATION_SECONDS, FEED_POLLS_TOTAL};

/// Breaker type used by pollers. The argument is the URL to fetch.
pub type FeedBreaker = CircuitBreaker<String, Value>;

/// What one poll did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Payload fetched and queued for dispatch.
    Published,
    /// The breaker is open; the upstream was not called.
    BreakerOpen,
    /// Payload fetched but the hub would not take it.
    Dropped,
}

impl PollOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::BreakerOpen => "breaker_open",
            Self::Dropped => "dropped",
        }
    }
}

/// Polls one feed into the hub.
pub struct FeedPoller {
    feed: FeedSettings,
    breaker: Arc<FeedBreaker>,
    hub: Arc<Hub>,
}

impl FeedPoller {
    /// Create a poller for `feed` calling through `breaker`.
    pub fn new(feed: FeedSettings, breaker: Arc<FeedBreaker>, hub: Arc<Hub>) -> Self {
        Self { feed, breaker, hub }
    }

    /// Feed name.
    pub fn name(&self) -> &str {
        &self.feed.name
    }

    /// Fetch once and publish. Upstream failures come back as the breaker's
    /// error; an open breaker is not an error.
    pub async fn poll_once(&self) -> std::result::Result<PollOutcome, BreakerError> {
        let started = Instant::now();
        let result = self.breaker.execute(self.feed.url.clone()).await;
        histogram!(FEED_POLL_DURATION_SECONDS, "feed" => self.feed.name.clone())
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(payload) => self.publish(payload),
            Err(BreakerError::Open { .. }) => PollOutcome::BreakerOpen,
            Err(e) => {
                counter!(FEED_POLLS_TOTAL, "feed" => self.feed.name.clone(), "outcome" => e.error_kind())
                    .increment(1);
                return Err(e);
            }
        };
        counter!(FEED_POLLS_TOTAL, "feed" => self.feed.name.clone(), "outcome" => outcome.as_str())
            .increment(1);
        Ok(outcome)
    }

    fn publish(&self, payload: Value) -> PollOutcome {
        let message = BroadcastMessage::new(self.feed.kind, Some(self.feed.topic.clone()), payload)
            .with_priority(self.feed.priority);
        match self.hub.enqueue(message) {
            Ok(()) => PollOutcome::Published,
            Err(HubError::ShuttingDown) => PollOutcome::Dropped,
            Err(e) => {
                warn!(feed = %self.feed.name, error = %e, "hub rejected feed payload");
                PollOutcome::Dropped
            }
        }
    }

    /// Poll every `interval_ms` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.feed.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(feed = %self.feed.name, topic = %self.feed.topic, "feed poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }
            match self.poll_once().await {
                Ok(PollOutcome::BreakerOpen) => {
                    debug!(feed = %self.feed.name, "breaker open, skipping poll");
                }
                Ok(_) => {}
                Err(BreakerError::Shutdown { .. }) => break,
                Err(e) => warn!(feed = %self.feed.name, error = %e, "feed poll failed"),
            }
        }
        info!(feed = %self.feed.name, "feed poller stopped");
    }

    /// Spawn [`FeedPoller::run`].
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

/// HTTP client shared by every poller.
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}

/// Build a poller for every configured feed, creating and registering one
/// breaker per distinct breaker name.
pub fn build_pollers(
    settings: &FeedwireSettings,
    hub: &Arc<Hub>,
    breakers: &BreakerRegistry,
    client: &reqwest::Client,
) -> Result<Vec<FeedPoller>> {
    let mut by_name: HashMap<String, Arc<FeedBreaker>> = HashMap::new();
    let mut pollers = Vec::with_capacity(settings.feeds.len());

    for feed in &settings.feeds {
        let name = feed.breaker_name().to_owned();
        let breaker = if let Some(b) = by_name.get(&name) {
            Arc::clone(b)
        } else {
            let b = breakers.create(&name, settings.breaker_config(&name), fetcher(client.clone()))?;
            let _ = by_name.insert(name, Arc::clone(&b));
            b
        };
        pollers.push(FeedPoller::new(feed.clone(), breaker, Arc::clone(hub)));
    }
    Ok(pollers)
}

/// The operation a feed breaker protects: `GET url` and parse JSON.
fn fetcher(client: reqwest::Client) -> impl Operation<String, Value> + 'static {
    move |url: String| {
        let client = client.clone();
        async move { fetch_json(&client, &url).await }
    }
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("GET {url}"))?;
    response
        .json::<Value>()
        .await
        .with_context(|| format!("decoding JSON from {url}"))
}
